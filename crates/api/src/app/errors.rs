use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use companyhub_infra::MembershipError;

pub fn membership_error_to_response(err: MembershipError) -> axum::response::Response {
    match err {
        MembershipError::Forbidden => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        MembershipError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        MembershipError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        MembershipError::InvariantViolation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invariant_violation", msg)
        }
        MembershipError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        MembershipError::StoreUnavailable(msg) => {
            tracing::warn!(error = %msg, "store unavailable");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "storage temporarily unavailable",
            )
        }
        MembershipError::Store(msg) => {
            tracing::error!(error = %msg, "store error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal storage error")
        }
    }
}

/// Malformed, incomplete or mistyped request bodies are all client errors.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    tracing::debug!(status = %rejection.status(), "rejected request body");
    json_error(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &str, raw: &str) -> axum::response::Response {
    json_error(
        StatusCode::BAD_REQUEST,
        "invalid_id",
        format!("invalid {what}: {raw:?}"),
    )
}
