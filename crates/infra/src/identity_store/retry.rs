//! Bounded retry of transient store failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use companyhub_auth::CompanyRole;
use companyhub_companies::{Company, CompanyMember, CompanyName};
use companyhub_core::{CompanyId, MembershipId, UserId};

use super::{IdentityStore, StoreError, StoreResult};

/// How often and how patiently to retry `StoreError::Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Store decorator that retries transient failures of the wrapped store.
///
/// Only `Unavailable` is retried. Every adapter guarantees that a failed
/// call left no visible effect, so a retried write is safe; if a commit was
/// acknowledged but the reply lost, the retry surfaces as `Conflict`.
#[derive(Debug, Clone)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = StoreResult<T>> + Send,
        T: Send,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut retry = 0;
        loop {
            match call().await {
                Err(err @ StoreError::Unavailable(_)) if retry + 1 < attempts => {
                    let delay = self.policy.delay_for(retry);
                    tracing::warn!(
                        operation,
                        attempt = retry + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(operation, attempts, error = %err, "store still unavailable; giving up");
                    }
                    return Err(err);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}

#[async_trait]
impl<S: IdentityStore> IdentityStore for RetryingStore<S> {
    async fn find_company_by_name(&self, name: &CompanyName) -> StoreResult<Option<Company>> {
        self.retry("find_company_by_name", || self.inner.find_company_by_name(name))
            .await
    }

    async fn find_company_by_id(&self, company_id: CompanyId) -> StoreResult<Option<Company>> {
        self.retry("find_company_by_id", || self.inner.find_company_by_id(company_id))
            .await
    }

    async fn insert_company(&self, company: Company, founder: CompanyMember) -> StoreResult<Company> {
        self.retry("insert_company", || {
            self.inner.insert_company(company.clone(), founder.clone())
        })
        .await
    }

    async fn insert_membership(&self, member: CompanyMember) -> StoreResult<CompanyMember> {
        self.retry("insert_membership", || self.inner.insert_membership(member.clone()))
            .await
    }

    async fn find_membership(
        &self,
        company_id: CompanyId,
        user_id: &UserId,
    ) -> StoreResult<Option<CompanyMember>> {
        self.retry("find_membership", || self.inner.find_membership(company_id, user_id))
            .await
    }

    async fn list_memberships_by_user(&self, user_id: &UserId) -> StoreResult<Vec<CompanyMember>> {
        self.retry("list_memberships_by_user", || {
            self.inner.list_memberships_by_user(user_id)
        })
        .await
    }

    async fn list_memberships_by_company(
        &self,
        company_id: CompanyId,
    ) -> StoreResult<Vec<CompanyMember>> {
        self.retry("list_memberships_by_company", || {
            self.inner.list_memberships_by_company(company_id)
        })
        .await
    }

    async fn count_owners(&self, company_id: CompanyId) -> StoreResult<u64> {
        self.retry("count_owners", || self.inner.count_owners(company_id))
            .await
    }

    async fn update_membership_role(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
        role: CompanyRole,
    ) -> StoreResult<()> {
        self.retry("update_membership_role", || {
            self.inner.update_membership_role(company_id, membership_id, role)
        })
        .await
    }

    async fn delete_membership(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
    ) -> StoreResult<()> {
        self.retry("delete_membership", || {
            self.inner.delete_membership(company_id, membership_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::identity_store::InMemoryIdentityStore;

    /// Fails the first `failures` owner counts with the given error.
    struct Flaky {
        inner: InMemoryIdentityStore,
        failures: AtomicU32,
        error: StoreError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: StoreError) -> Self {
            Self {
                inner: InMemoryIdentityStore::new(),
                failures: AtomicU32::new(failures),
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityStore for Flaky {
        async fn find_company_by_name(&self, name: &CompanyName) -> StoreResult<Option<Company>> {
            self.inner.find_company_by_name(name).await
        }
        async fn find_company_by_id(&self, id: CompanyId) -> StoreResult<Option<Company>> {
            self.inner.find_company_by_id(id).await
        }
        async fn insert_company(&self, c: Company, f: CompanyMember) -> StoreResult<Company> {
            self.inner.insert_company(c, f).await
        }
        async fn insert_membership(&self, m: CompanyMember) -> StoreResult<CompanyMember> {
            self.inner.insert_membership(m).await
        }
        async fn find_membership(
            &self,
            c: CompanyId,
            u: &UserId,
        ) -> StoreResult<Option<CompanyMember>> {
            self.inner.find_membership(c, u).await
        }
        async fn list_memberships_by_user(&self, u: &UserId) -> StoreResult<Vec<CompanyMember>> {
            self.inner.list_memberships_by_user(u).await
        }
        async fn list_memberships_by_company(
            &self,
            c: CompanyId,
        ) -> StoreResult<Vec<CompanyMember>> {
            self.inner.list_memberships_by_company(c).await
        }
        async fn count_owners(&self, c: CompanyId) -> StoreResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            self.inner.count_owners(c).await
        }
        async fn update_membership_role(
            &self,
            c: CompanyId,
            m: MembershipId,
            r: CompanyRole,
        ) -> StoreResult<()> {
            self.inner.update_membership_role(c, m, r).await
        }
        async fn delete_membership(&self, c: CompanyId, m: MembershipId) -> StoreResult<()> {
            self.inner.delete_membership(c, m).await
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let flaky = Flaky::new(2, StoreError::Unavailable("connection reset".into()));
        let store = RetryingStore::new(flaky, fast_policy(3));

        assert_eq!(store.count_owners(CompanyId::new()).await, Ok(0));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let flaky = Flaky::new(10, StoreError::Unavailable("down".into()));
        let store = RetryingStore::new(flaky, fast_policy(3));

        let err = store.count_owners(CompanyId::new()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deterministic_errors_are_not_retried() {
        let flaky = Flaky::new(10, StoreError::Backend("corrupt row".into()));
        let store = RetryingStore::new(flaky, fast_policy(5));

        let err = store.count_owners(CompanyId::new()).await.unwrap_err();
        assert_eq!(err, StoreError::Backend("corrupt row".into()));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(40), Duration::from_millis(300));
    }
}
