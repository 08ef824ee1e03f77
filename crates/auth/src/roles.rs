use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::{Permission, PermissionSet};

/// Role a user holds inside one company.
///
/// Closed set: adding a role means revisiting [`CompanyRole::permissions`],
/// which the compiler enforces through the exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompanyRole {
    Owner,
    Admin,
    Manager,
    Member,
}

impl CompanyRole {
    pub const ALL: [CompanyRole; 4] = [
        CompanyRole::Owner,
        CompanyRole::Admin,
        CompanyRole::Manager,
        CompanyRole::Member,
    ];

    /// Permission bits granted by this role.
    pub const fn permissions(self) -> PermissionSet {
        match self {
            CompanyRole::Owner | CompanyRole::Admin => PermissionSet::empty()
                .with(Permission::ViewCompany)
                .with(Permission::ViewMembers)
                .with(Permission::ManageMembers),
            CompanyRole::Manager | CompanyRole::Member => PermissionSet::empty()
                .with(Permission::ViewCompany)
                .with(Permission::ViewMembers),
        }
    }

    pub fn is_owner(self) -> bool {
        self == CompanyRole::Owner
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompanyRole::Owner => "Owner",
            CompanyRole::Admin => "Admin",
            CompanyRole::Manager => "Manager",
            CompanyRole::Member => "Member",
        }
    }
}

impl core::fmt::Display for CompanyRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown company role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for CompanyRole {
    type Err = UnknownRole;

    /// Case-insensitive, so both the wire form (`Owner`) and the storage form
    /// (`owner`) parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompanyRole::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}
