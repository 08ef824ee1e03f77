use serde::{Deserialize, Serialize};

use companyhub_auth::CompanyRole;
use companyhub_companies::CompanyMember;
use companyhub_core::{CompanyId, UserId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyMembershipResponse {
    pub user_id: UserId,
    pub role: CompanyRole,
    pub company_id: CompanyId,
}

impl From<CompanyMember> for MyMembershipResponse {
    fn from(m: CompanyMember) -> Self {
        Self {
            user_id: m.user_id,
            role: m.role,
            company_id: m.company_id,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn json_body<T>(
    body: Result<axum::Json<T>, axum::extract::rejection::JsonRejection>,
) -> Result<T, axum::response::Response> {
    body.map(|axum::Json(b)| b)
        .map_err(errors::json_rejection_to_response)
}

pub fn parse_role(raw: &str) -> Result<CompanyRole, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_role",
            "role must be one of: Owner, Admin, Manager, Member",
        )
    })
}

pub fn parse_company_id(raw: &str) -> Result<CompanyId, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_id("company id", raw))
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    UserId::parse(raw).map_err(|_| errors::invalid_id("user id", raw))
}
