use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use companyhub_core::UserId;

use crate::app::errors::json_error;
use crate::context::CallerContext;

/// Header carrying the already-authenticated caller id.
pub const CALLER_HEADER: &str = "x-user-id";

/// Reject requests without a usable caller id; attach [`CallerContext`]
/// to the rest.
pub async fn caller_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let user_id = extract_caller(req.headers()).ok_or_else(|| {
        tracing::debug!(path = %req.uri().path(), "rejected: missing or invalid caller id");
        json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "missing or invalid X-User-Id header",
        )
    })?;

    req.extensions_mut().insert(CallerContext::new(user_id));
    Ok(next.run(req).await)
}

/// The id is opaque: it is taken byte for byte, exactly like user ids in
/// request paths and bodies, so the same user always resolves the same way.
fn extract_caller(headers: &HeaderMap) -> Option<UserId> {
    let raw = headers.get(CALLER_HEADER)?.to_str().ok()?;
    UserId::parse(raw).ok()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CALLER_HEADER, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn caller_matches_body_and_path_ids_verbatim() {
        for raw in ["u1", " u2", "u3 "] {
            let from_header = extract_caller(&headers(raw)).unwrap();
            assert_eq!(crate::app::dto::parse_user_id(raw).ok(), Some(from_header.clone()));
            assert_eq!(from_header.as_str(), raw);
        }
    }

    #[test]
    fn missing_blank_or_oversized_caller_is_rejected() {
        assert!(extract_caller(&HeaderMap::new()).is_none());
        assert!(extract_caller(&headers("   ")).is_none());
        assert!(extract_caller(&headers(&"u".repeat(129))).is_none());
    }
}
