//! Membership orchestration: role policy checks sequenced against the
//! identity store.
//!
//! Every operation resolves the caller's own membership first. A caller who
//! is not a member of the company gets `Forbidden` before anything else is
//! looked up, so a non-member cannot tell a missing company from one they
//! are not allowed to see.

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use companyhub_auth::{AuthzError, CompanyRole, Permission, authorize};
use companyhub_companies::{Company, CompanyMember, CompanyName, Plan};
use companyhub_core::{CompanyId, DomainError, UserId};

use crate::identity_store::{IdentityStore, StoreError};
use crate::lifecycle;

const USER_ALREADY_MEMBER: &str = "user already a member";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    /// Caller is not a member, or their role lacks the permission.
    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    /// Uniqueness violation (company name, or user already in the company).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Last-Owner guard tripped.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Transient store failure that outlived the retry budget.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for MembershipError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => MembershipError::Conflict(msg),
            StoreError::NotFound => MembershipError::NotFound,
            StoreError::LastOwner => MembershipError::InvariantViolation(
                "a company must keep at least one Owner".to_string(),
            ),
            StoreError::Unavailable(msg) => MembershipError::StoreUnavailable(msg),
            StoreError::Backend(msg) => MembershipError::Store(msg),
        }
    }
}

impl From<DomainError> for MembershipError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                MembershipError::Validation(msg)
            }
        }
    }
}

impl From<AuthzError> for MembershipError {
    fn from(_: AuthzError) -> Self {
        MembershipError::Forbidden
    }
}

/// Company and membership operations on behalf of an authenticated caller.
///
/// Holds no mutable state of its own; everything lives in the store, so one
/// instance can serve any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct MembershipService<S> {
    store: S,
}

impl<S> MembershipService<S>
where
    S: IdentityStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve the caller's role and check it grants `required`.
    async fn require(
        &self,
        caller: &UserId,
        company_id: CompanyId,
        required: Permission,
    ) -> Result<CompanyRole, MembershipError> {
        let role = self
            .store
            .find_membership(company_id, caller)
            .await?
            .map(|m| m.role);
        authorize(role, required)?;
        // authorize() only passes when a role is present.
        role.ok_or(MembershipError::Forbidden)
    }

    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn create_company(
        &self,
        caller: &UserId,
        name: &str,
        plan: Option<&str>,
    ) -> Result<Company, MembershipError> {
        let name = CompanyName::parse(name)?;
        let plan = Plan::parse_or_default(plan)?;
        lifecycle::found_company(&self.store, caller, name, plan).await
    }

    /// Every company the caller belongs to, in membership order.
    #[instrument(skip_all, fields(caller = %caller))]
    pub async fn list_my_companies(&self, caller: &UserId) -> Result<Vec<Company>, MembershipError> {
        let memberships = self.store.list_memberships_by_user(caller).await?;
        let mut companies = Vec::with_capacity(memberships.len());
        for m in memberships {
            match self.store.find_company_by_id(m.company_id).await? {
                Some(company) => companies.push(company),
                None => tracing::warn!(company_id = %m.company_id, "membership points at a missing company"),
            }
        }
        Ok(companies)
    }

    #[instrument(skip_all, fields(caller = %caller, company_id = %company_id))]
    pub async fn get_company(
        &self,
        caller: &UserId,
        company_id: CompanyId,
    ) -> Result<Company, MembershipError> {
        self.require(caller, company_id, Permission::ViewCompany).await?;
        self.store
            .find_company_by_id(company_id)
            .await?
            .ok_or(MembershipError::NotFound)
    }

    #[instrument(skip_all, fields(caller = %caller, company_id = %company_id))]
    pub async fn list_members(
        &self,
        caller: &UserId,
        company_id: CompanyId,
    ) -> Result<Vec<CompanyMember>, MembershipError> {
        self.require(caller, company_id, Permission::ViewMembers).await?;
        Ok(self.store.list_memberships_by_company(company_id).await?)
    }

    #[instrument(skip_all, fields(caller = %caller, company_id = %company_id, target = %target, role = %role))]
    pub async fn add_member(
        &self,
        caller: &UserId,
        company_id: CompanyId,
        target: UserId,
        role: CompanyRole,
    ) -> Result<CompanyMember, MembershipError> {
        self.require(caller, company_id, Permission::ManageMembers).await?;

        if self.store.find_membership(company_id, &target).await?.is_some() {
            tracing::debug!("target already a member");
            return Err(MembershipError::Conflict(USER_ALREADY_MEMBER.to_string()));
        }

        let member = CompanyMember::new(company_id, target, role, Utc::now());
        let member = self.store.insert_membership(member).await?;
        tracing::info!(membership_id = %member.id, "member added");
        Ok(member)
    }

    #[instrument(skip_all, fields(caller = %caller, company_id = %company_id, target = %target, role = %role))]
    pub async fn update_member_role(
        &self,
        caller: &UserId,
        company_id: CompanyId,
        target: &UserId,
        role: CompanyRole,
    ) -> Result<(), MembershipError> {
        self.require(caller, company_id, Permission::ManageMembers).await?;

        let member = self
            .store
            .find_membership(company_id, target)
            .await?
            .ok_or(MembershipError::NotFound)?;

        match self
            .store
            .update_membership_role(company_id, member.id, role)
            .await
        {
            Ok(()) => {
                tracing::info!(from = %member.role, "member role changed");
                Ok(())
            }
            Err(StoreError::LastOwner) => {
                tracing::debug!("refused: last Owner");
                Err(MembershipError::InvariantViolation(
                    "cannot demote the last Owner".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all, fields(caller = %caller, company_id = %company_id, target = %target))]
    pub async fn remove_member(
        &self,
        caller: &UserId,
        company_id: CompanyId,
        target: &UserId,
    ) -> Result<(), MembershipError> {
        self.require(caller, company_id, Permission::ManageMembers).await?;

        let member = self
            .store
            .find_membership(company_id, target)
            .await?
            .ok_or(MembershipError::NotFound)?;

        match self.store.delete_membership(company_id, member.id).await {
            Ok(()) => {
                tracing::info!(role = %member.role, "member removed");
                Ok(())
            }
            Err(StoreError::LastOwner) => {
                tracing::debug!("refused: last Owner");
                Err(MembershipError::InvariantViolation(
                    "cannot remove the last Owner".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The caller's own membership, if any. Needs no permission.
    #[instrument(skip_all, fields(caller = %caller, company_id = %company_id))]
    pub async fn get_my_membership(
        &self,
        caller: &UserId,
        company_id: CompanyId,
    ) -> Result<Option<CompanyMember>, MembershipError> {
        Ok(self.store.find_membership(company_id, caller).await?)
    }
}
