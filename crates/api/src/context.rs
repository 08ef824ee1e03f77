use companyhub_core::UserId;

/// Caller identity for a request.
///
/// Inserted by [`crate::middleware::caller_middleware`]; every company route
/// can rely on it being present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    user_id: UserId,
}

impl CallerContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}
