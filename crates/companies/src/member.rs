use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use companyhub_auth::CompanyRole;
use companyhub_core::{CompanyId, MembershipId, UserId};

/// One user's membership in one company.
///
/// `(company_id, user_id)` is unique: a user holds at most one role per company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyMember {
    pub id: MembershipId,
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub role: CompanyRole,
    pub created_at: DateTime<Utc>,
}

impl CompanyMember {
    pub fn new(
        company_id: CompanyId,
        user_id: UserId,
        role: CompanyRole,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MembershipId::new(),
            company_id,
            user_id,
            role,
            created_at,
        }
    }

    /// The Owner membership created together with a company.
    pub fn founder(company_id: CompanyId, user_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self::new(company_id, user_id, CompanyRole::Owner, created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn founder_is_owner() {
        let company_id = CompanyId::new();
        let m = CompanyMember::founder(company_id, UserId::parse("u1").unwrap(), Utc::now());
        assert_eq!(m.role, CompanyRole::Owner);
        assert_eq!(m.company_id, company_id);
    }

    #[test]
    fn json_uses_camel_case() {
        let m = CompanyMember::new(
            CompanyId::new(),
            UserId::parse("u2").unwrap(),
            CompanyRole::Manager,
            Utc::now(),
        );
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["userId"], "u2");
        assert_eq!(json["role"], "Manager");
        assert_eq!(json["companyId"], m.company_id.to_string());
    }
}
