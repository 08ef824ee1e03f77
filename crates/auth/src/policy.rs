//! Membership rules: who may manage a roster, and the last-Owner safeguard.
//!
//! Every function here is total and side-effect free. The owner count passed
//! to the guards must be taken *before* the mutation it protects and must
//! include the target membership itself.

use crate::{CompanyRole, Permission};

/// Outcome of the last-Owner safeguard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerGuard {
    Allow,
    Deny,
}

impl OwnerGuard {
    pub fn is_allowed(self) -> bool {
        self == OwnerGuard::Allow
    }
}

/// True iff `role` may add, re-role or remove memberships.
pub fn can_manage_members(role: CompanyRole) -> bool {
    role.permissions().contains(Permission::ManageMembers)
}

/// Any membership, whatever its role, grants read access.
pub fn can_view_company(membership_exists: bool) -> bool {
    membership_exists
}

/// Decide whether a membership holding `target_role` may stop being an Owner
/// (demotion or removal) given the company's current Owner count.
pub fn guard_last_owner_removal(target_role: CompanyRole, owner_count: u64) -> OwnerGuard {
    if target_role.is_owner() && owner_count <= 1 {
        OwnerGuard::Deny
    } else {
        OwnerGuard::Allow
    }
}

/// Guard for changing a membership from `current` to `new`.
///
/// Moving to `Owner` never reduces the Owner count, so it is always allowed.
pub fn guard_role_change(current: CompanyRole, new: CompanyRole, owner_count: u64) -> OwnerGuard {
    if new.is_owner() {
        return OwnerGuard::Allow;
    }
    guard_last_owner_removal(current, owner_count)
}
