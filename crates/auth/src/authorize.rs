use thiserror::Error;

use crate::{CompanyRole, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: caller is not a member of the company")]
    NotAMember,

    #[error("forbidden: role '{role}' lacks permission '{required}'")]
    MissingPermission {
        role: CompanyRole,
        required: Permission,
    },
}

/// Authorize a caller whose membership lookup produced `role`.
///
/// `None` means the caller holds no membership in the company. Callers must
/// not distinguish the two error variants towards the outside: both mean
/// "forbidden", and a non-member must learn nothing about the company.
///
/// - No IO
/// - No panics
pub fn authorize(role: Option<CompanyRole>, required: Permission) -> Result<(), AuthzError> {
    let Some(role) = role else {
        tracing::debug!(permission = %required, "denied: no membership");
        return Err(AuthzError::NotAMember);
    };

    if role.permissions().contains(required) {
        Ok(())
    } else {
        tracing::debug!(%role, permission = %required, "denied: missing permission");
        Err(AuthzError::MissingPermission { role, required })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_member_is_denied_everything() {
        for perm in [
            Permission::ViewCompany,
            Permission::ViewMembers,
            Permission::ManageMembers,
        ] {
            assert_eq!(authorize(None, perm), Err(AuthzError::NotAMember));
        }
    }

    #[test]
    fn manager_cannot_manage_members() {
        let err = authorize(Some(CompanyRole::Manager), Permission::ManageMembers).unwrap_err();
        assert_eq!(
            err,
            AuthzError::MissingPermission {
                role: CompanyRole::Manager,
                required: Permission::ManageMembers,
            }
        );
        assert!(err.to_string().contains("members.manage"));
    }

    #[test]
    fn admin_can_manage_members() {
        assert!(authorize(Some(CompanyRole::Admin), Permission::ManageMembers).is_ok());
    }

    #[test]
    fn member_can_view() {
        assert!(authorize(Some(CompanyRole::Member), Permission::ViewMembers).is_ok());
    }
}
