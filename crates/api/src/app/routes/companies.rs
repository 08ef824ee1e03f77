use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, patch},
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::CallerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_my_companies).post(create_company))
        .route("/:id", get(get_company))
        .route("/:id/members", get(list_members).post(add_member))
        .route(
            "/:id/members/:user_id",
            patch(update_member_role).delete(remove_member),
        )
        .route("/:id/me", get(get_my_membership))
}

pub async fn create_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    body: Result<Json<dto::CreateCompanyRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let company = match services
        .membership
        .create_company(caller.user_id(), &body.name, body.plan.as_deref())
        .await
    {
        Ok(c) => c,
        Err(e) => return errors::membership_error_to_response(e),
    };

    let location = format!("/companies/{}", company.id);
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(company),
    )
        .into_response()
}

pub async fn list_my_companies(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
) -> axum::response::Response {
    match services.membership.list_my_companies(caller.user_id()).await {
        Ok(companies) => (StatusCode::OK, Json(companies)).into_response(),
        Err(e) => errors::membership_error_to_response(e),
    }
}

pub async fn get_company(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let company_id = match dto::parse_company_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.membership.get_company(caller.user_id(), company_id).await {
        Ok(company) => (StatusCode::OK, Json(company)).into_response(),
        Err(e) => errors::membership_error_to_response(e),
    }
}

pub async fn list_members(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let company_id = match dto::parse_company_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.membership.list_members(caller.user_id(), company_id).await {
        Ok(members) => (StatusCode::OK, Json(members)).into_response(),
        Err(e) => errors::membership_error_to_response(e),
    }
}

pub async fn add_member(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::AddMemberRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let company_id = match dto::parse_company_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let target = match dto::parse_user_id(&body.user_id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let role = match dto::parse_role(&body.role) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let member = match services
        .membership
        .add_member(caller.user_id(), company_id, target, role)
        .await
    {
        Ok(m) => m,
        Err(e) => return errors::membership_error_to_response(e),
    };

    let location = format!("/companies/{}/members/{}", company_id, member.user_id);
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(member),
    )
        .into_response()
}

pub async fn update_member_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((id, user_id)): Path<(String, String)>,
    body: Result<Json<dto::UpdateMemberRoleRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let company_id = match dto::parse_company_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let target = match dto::parse_user_id(&user_id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let role = match dto::parse_role(&body.role) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services
        .membership
        .update_member_role(caller.user_id(), company_id, &target, role)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::membership_error_to_response(e),
    }
}

pub async fn remove_member(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path((id, user_id)): Path<(String, String)>,
) -> axum::response::Response {
    let company_id = match dto::parse_company_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let target = match dto::parse_user_id(&user_id) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match services
        .membership
        .remove_member(caller.user_id(), company_id, &target)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::membership_error_to_response(e),
    }
}

/// The caller's own membership. A caller outside the company gets the same
/// 403 as every other company route.
pub async fn get_my_membership(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let company_id = match dto::parse_company_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .membership
        .get_my_membership(caller.user_id(), company_id)
        .await
    {
        Ok(Some(member)) => (StatusCode::OK, Json(dto::MyMembershipResponse::from(member))).into_response(),
        Ok(None) => errors::json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        Err(e) => errors::membership_error_to_response(e),
    }
}
