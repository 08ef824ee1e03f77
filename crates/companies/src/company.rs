use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use companyhub_core::{CompanyId, DomainError};

/// Maximum length (in characters) of a company name.
pub const NAME_MAX_LEN: usize = 160;

/// Maximum length (in characters) of a plan tag.
pub const PLAN_MAX_LEN: usize = 40;

/// Plan assigned when the caller does not choose one.
pub const DEFAULT_PLAN: &str = "free";

/// Company display name, unique across all companies.
///
/// Surrounding whitespace is trimmed; comparison is exact on the trimmed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompanyName(String);

impl CompanyName {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(DomainError::validation("company name must not be empty"));
        }
        if name.chars().count() > NAME_MAX_LEN {
            return Err(DomainError::validation(format!(
                "company name must be at most {NAME_MAX_LEN} characters"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CompanyName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CompanyName> for String {
    fn from(value: CompanyName) -> Self {
        value.0
    }
}

impl core::fmt::Display for CompanyName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Billing plan tag. Stored and echoed, never enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Plan(String);

impl Plan {
    /// Parse an optional plan; missing or blank input yields [`DEFAULT_PLAN`].
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, DomainError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(plan) => Self::parse(plan),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let plan = raw.trim();
        if plan.is_empty() {
            return Err(DomainError::validation("plan must not be empty"));
        }
        if plan.chars().count() > PLAN_MAX_LEN {
            return Err(DomainError::validation(format!(
                "plan must be at most {PLAN_MAX_LEN} characters"
            )));
        }
        Ok(Self(plan.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self(DEFAULT_PLAN.to_string())
    }
}

impl TryFrom<String> for Plan {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Plan> for String {
    fn from(value: Plan) -> Self {
        value.0
    }
}

/// A tenant: owns its memberships (deleting it cascades to them).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: CompanyId,
    pub name: CompanyName,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
}

impl Company {
    /// Build a not-yet-persisted company with a fresh id.
    pub fn new(name: CompanyName, plan: Plan, created_at: DateTime<Utc>) -> Self {
        Self {
            id: CompanyId::new(),
            name,
            plan,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_trimmed() {
        assert_eq!(CompanyName::parse("  Acme  ").unwrap().as_str(), "Acme");
    }

    #[test]
    fn name_bounds() {
        assert!(CompanyName::parse("").is_err());
        assert!(CompanyName::parse("   ").is_err());
        assert!(CompanyName::parse(&"x".repeat(NAME_MAX_LEN)).is_ok());
        let err = CompanyName::parse(&"x".repeat(NAME_MAX_LEN + 1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn plan_defaults_to_free() {
        assert_eq!(Plan::parse_or_default(None).unwrap().as_str(), "free");
        assert_eq!(Plan::parse_or_default(Some("  ")).unwrap().as_str(), "free");
        assert_eq!(Plan::parse_or_default(Some("pro")).unwrap().as_str(), "pro");
        assert!(Plan::parse_or_default(Some(&"p".repeat(PLAN_MAX_LEN + 1))).is_err());
    }

    #[test]
    fn company_json_shape() {
        let company = Company::new(
            CompanyName::parse("Acme").unwrap(),
            Plan::default(),
            Utc::now(),
        );
        let json = serde_json::to_value(&company).unwrap();
        assert_eq!(json["name"], "Acme");
        assert_eq!(json["plan"], "free");
        assert_eq!(json["id"], company.id.to_string());
        assert!(json.get("createdAt").is_some());
    }
}
