/// Action a caller may attempt on a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Read the company record.
    ViewCompany,
    /// Read the member roster.
    ViewMembers,
    /// Add, re-role or remove memberships.
    ManageMembers,
}

impl Permission {
    const fn bit(self) -> u8 {
        match self {
            Permission::ViewCompany => 1 << 0,
            Permission::ViewMembers => 1 << 1,
            Permission::ManageMembers => 1 << 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ViewCompany => "company.view",
            Permission::ViewMembers => "members.view",
            Permission::ManageMembers => "members.manage",
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bit set of [`Permission`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PermissionSet(u8);

impl PermissionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, permission: Permission) -> Self {
        Self(self.0 | permission.bit())
    }

    pub const fn contains(self, permission: Permission) -> bool {
        self.0 & permission.bit() != 0
    }
}
