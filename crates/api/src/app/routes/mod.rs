use axum::Router;

pub mod companies;
pub mod system;

/// Router for all endpoints that act on behalf of a caller.
pub fn router() -> Router {
    Router::new().nest("/companies", companies::router())
}
