//! `companyhub-auth`: pure role policy for company membership.
//!
//! This crate is intentionally decoupled from HTTP and storage: it decides,
//! it never looks anything up.

pub mod authorize;
pub mod permissions;
pub mod policy;
pub mod roles;

pub use authorize::{AuthzError, authorize};
pub use permissions::{Permission, PermissionSet};
pub use policy::{
    OwnerGuard, can_manage_members, can_view_company, guard_last_owner_removal, guard_role_change,
};
pub use roles::CompanyRole;
