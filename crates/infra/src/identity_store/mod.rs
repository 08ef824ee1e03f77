//! Identity store boundary.
//!
//! The membership core only talks to storage through [`IdentityStore`]. The
//! trait makes no storage assumptions; what it does require is that the
//! guarded mutations (`update_membership_role`, `delete_membership`) evaluate
//! the last-Owner guard and perform the write as **one atomic unit**, so two
//! concurrent demotions of a two-Owner company cannot both pass.

pub mod in_memory;
pub mod postgres;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use companyhub_auth::CompanyRole;
use companyhub_companies::{Company, CompanyMember, CompanyName};
use companyhub_core::{CompanyId, MembershipId, UserId};

pub use in_memory::InMemoryIdentityStore;
pub use postgres::PostgresIdentityStore;
pub use retry::{RetryPolicy, RetryingStore};

pub type StoreResult<T> = Result<T, StoreError>;

/// Identity store operation error.
///
/// `Conflict`, `NotFound` and `LastOwner` are deterministic outcomes of the
/// request; `Unavailable` is transient and may succeed on retry; `Backend`
/// covers everything else (corrupt rows, unexpected driver errors).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,

    #[error("the last Owner of a company cannot be demoted or removed")]
    LastOwner,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Durable storage of companies and memberships.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_company_by_name(&self, name: &CompanyName) -> StoreResult<Option<Company>>;

    async fn find_company_by_id(&self, company_id: CompanyId) -> StoreResult<Option<Company>>;

    /// Insert a company together with its founding membership.
    ///
    /// Both rows become visible together or not at all. Fails with
    /// `Conflict` when the name is taken.
    async fn insert_company(&self, company: Company, founder: CompanyMember) -> StoreResult<Company>;

    /// Fails with `Conflict` when the user already belongs to the company and
    /// with `NotFound` when the company does not exist.
    async fn insert_membership(&self, member: CompanyMember) -> StoreResult<CompanyMember>;

    async fn find_membership(
        &self,
        company_id: CompanyId,
        user_id: &UserId,
    ) -> StoreResult<Option<CompanyMember>>;

    async fn list_memberships_by_user(&self, user_id: &UserId) -> StoreResult<Vec<CompanyMember>>;

    async fn list_memberships_by_company(
        &self,
        company_id: CompanyId,
    ) -> StoreResult<Vec<CompanyMember>>;

    async fn count_owners(&self, company_id: CompanyId) -> StoreResult<u64>;

    /// Change a membership's role, atomically with the last-Owner guard.
    ///
    /// Fails with `NotFound` if the membership is gone and with `LastOwner` if
    /// the change would leave the company without an Owner.
    async fn update_membership_role(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
        role: CompanyRole,
    ) -> StoreResult<()>;

    /// Delete a membership, atomically with the last-Owner guard.
    async fn delete_membership(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
    ) -> StoreResult<()>;
}

#[async_trait]
impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    async fn find_company_by_name(&self, name: &CompanyName) -> StoreResult<Option<Company>> {
        (**self).find_company_by_name(name).await
    }

    async fn find_company_by_id(&self, company_id: CompanyId) -> StoreResult<Option<Company>> {
        (**self).find_company_by_id(company_id).await
    }

    async fn insert_company(&self, company: Company, founder: CompanyMember) -> StoreResult<Company> {
        (**self).insert_company(company, founder).await
    }

    async fn insert_membership(&self, member: CompanyMember) -> StoreResult<CompanyMember> {
        (**self).insert_membership(member).await
    }

    async fn find_membership(
        &self,
        company_id: CompanyId,
        user_id: &UserId,
    ) -> StoreResult<Option<CompanyMember>> {
        (**self).find_membership(company_id, user_id).await
    }

    async fn list_memberships_by_user(&self, user_id: &UserId) -> StoreResult<Vec<CompanyMember>> {
        (**self).list_memberships_by_user(user_id).await
    }

    async fn list_memberships_by_company(
        &self,
        company_id: CompanyId,
    ) -> StoreResult<Vec<CompanyMember>> {
        (**self).list_memberships_by_company(company_id).await
    }

    async fn count_owners(&self, company_id: CompanyId) -> StoreResult<u64> {
        (**self).count_owners(company_id).await
    }

    async fn update_membership_role(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
        role: CompanyRole,
    ) -> StoreResult<()> {
        (**self).update_membership_role(company_id, membership_id, role).await
    }

    async fn delete_membership(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
    ) -> StoreResult<()> {
        (**self).delete_membership(company_id, membership_id).await
    }
}
