use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use companyhub_auth::{CompanyRole, guard_last_owner_removal, guard_role_change};
use companyhub_companies::{Company, CompanyMember, CompanyName};
use companyhub_core::{CompanyId, MembershipId, UserId};

use super::{IdentityStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    companies: HashMap<CompanyId, Company>,
    /// Unique index on company name.
    names: HashMap<CompanyName, CompanyId>,
    /// Ordered by id, which is time-ordered, so listings come back in
    /// creation order.
    members: BTreeMap<MembershipId, CompanyMember>,
    /// Unique index on (company, user).
    member_keys: HashMap<(CompanyId, UserId), MembershipId>,
}

impl Tables {
    fn owner_count(&self, company_id: CompanyId) -> u64 {
        self.members
            .values()
            .filter(|m| m.company_id == company_id && m.role.is_owner())
            .count() as u64
    }

    fn guarded_target(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
    ) -> StoreResult<&CompanyMember> {
        self.members
            .get(&membership_id)
            .filter(|m| m.company_id == company_id)
            .ok_or(StoreError::NotFound)
    }

    fn insert_member_unchecked(&mut self, member: CompanyMember) {
        self.member_keys
            .insert((member.company_id, member.user_id.clone()), member.id);
        self.members.insert(member.id, member);
    }
}

/// In-memory identity store for tests/dev.
///
/// All tables sit behind one lock. Every write, including the owner count
/// and guard of the guarded mutations, happens under a single write-lock
/// acquisition, which makes each operation atomic.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    inner: RwLock<Tables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn insert_company_sync(&self, company: Company, founder: CompanyMember) -> StoreResult<Company> {
        if founder.company_id != company.id {
            return Err(StoreError::Backend(
                "founding membership belongs to a different company".to_string(),
            ));
        }

        let mut tables = self.write()?;
        if tables.names.contains_key(&company.name) {
            return Err(StoreError::Conflict("company name already taken".to_string()));
        }
        if tables.companies.contains_key(&company.id) {
            return Err(StoreError::Conflict(format!("company {} already exists", company.id)));
        }

        tables.names.insert(company.name.clone(), company.id);
        tables.companies.insert(company.id, company.clone());
        tables.insert_member_unchecked(founder);
        Ok(company)
    }

    fn insert_membership_sync(&self, member: CompanyMember) -> StoreResult<CompanyMember> {
        let mut tables = self.write()?;
        if !tables.companies.contains_key(&member.company_id) {
            return Err(StoreError::NotFound);
        }
        let key = (member.company_id, member.user_id.clone());
        if tables.member_keys.contains_key(&key) || tables.members.contains_key(&member.id) {
            return Err(StoreError::Conflict("user already a member".to_string()));
        }
        tables.insert_member_unchecked(member.clone());
        Ok(member)
    }

    fn update_role_sync(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
        role: CompanyRole,
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        let current = tables.guarded_target(company_id, membership_id)?.role;
        let owners = tables.owner_count(company_id);
        if !guard_role_change(current, role, owners).is_allowed() {
            return Err(StoreError::LastOwner);
        }
        if let Some(member) = tables.members.get_mut(&membership_id) {
            member.role = role;
        }
        Ok(())
    }

    fn delete_sync(&self, company_id: CompanyId, membership_id: MembershipId) -> StoreResult<()> {
        let mut tables = self.write()?;
        let target = tables.guarded_target(company_id, membership_id)?;
        let (role, user_id) = (target.role, target.user_id.clone());
        let owners = tables.owner_count(company_id);
        if !guard_last_owner_removal(role, owners).is_allowed() {
            return Err(StoreError::LastOwner);
        }
        tables.members.remove(&membership_id);
        tables.member_keys.remove(&(company_id, user_id));
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_company_by_name(&self, name: &CompanyName) -> StoreResult<Option<Company>> {
        let tables = self.read()?;
        Ok(tables
            .names
            .get(name)
            .and_then(|id| tables.companies.get(id))
            .cloned())
    }

    async fn find_company_by_id(&self, company_id: CompanyId) -> StoreResult<Option<Company>> {
        Ok(self.read()?.companies.get(&company_id).cloned())
    }

    async fn insert_company(&self, company: Company, founder: CompanyMember) -> StoreResult<Company> {
        self.insert_company_sync(company, founder)
    }

    async fn insert_membership(&self, member: CompanyMember) -> StoreResult<CompanyMember> {
        self.insert_membership_sync(member)
    }

    async fn find_membership(
        &self,
        company_id: CompanyId,
        user_id: &UserId,
    ) -> StoreResult<Option<CompanyMember>> {
        let tables = self.read()?;
        Ok(tables
            .member_keys
            .get(&(company_id, user_id.clone()))
            .and_then(|id| tables.members.get(id))
            .cloned())
    }

    async fn list_memberships_by_user(&self, user_id: &UserId) -> StoreResult<Vec<CompanyMember>> {
        Ok(self
            .read()?
            .members
            .values()
            .filter(|m| &m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_memberships_by_company(
        &self,
        company_id: CompanyId,
    ) -> StoreResult<Vec<CompanyMember>> {
        Ok(self
            .read()?
            .members
            .values()
            .filter(|m| m.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn count_owners(&self, company_id: CompanyId) -> StoreResult<u64> {
        Ok(self.read()?.owner_count(company_id))
    }

    async fn update_membership_role(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
        role: CompanyRole,
    ) -> StoreResult<()> {
        self.update_role_sync(company_id, membership_id, role)
    }

    async fn delete_membership(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
    ) -> StoreResult<()> {
        self.delete_sync(company_id, membership_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use companyhub_companies::Plan;

    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    async fn seed(store: &InMemoryIdentityStore, name: &str, owner: &str) -> Company {
        let company = Company::new(CompanyName::parse(name).unwrap(), Plan::default(), Utc::now());
        let founder = CompanyMember::founder(company.id, user(owner), Utc::now());
        store.insert_company(company, founder).await.unwrap()
    }

    #[tokio::test]
    async fn insert_company_writes_founder() {
        let store = InMemoryIdentityStore::new();
        let company = seed(&store, "Acme", "u1").await;

        let founder = store.find_membership(company.id, &user("u1")).await.unwrap().unwrap();
        assert_eq!(founder.role, CompanyRole::Owner);
        assert_eq!(store.count_owners(company.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_name_conflicts_and_writes_nothing() {
        let store = InMemoryIdentityStore::new();
        seed(&store, "Acme", "u1").await;

        let again = Company::new(CompanyName::parse("Acme").unwrap(), Plan::default(), Utc::now());
        let founder = CompanyMember::founder(again.id, user("u2"), Utc::now());
        let err = store.insert_company(again.clone(), founder).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.find_company_by_id(again.id).await.unwrap().is_none());
        assert!(store.list_memberships_by_user(&user("u2")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_founder_is_rejected() {
        let store = InMemoryIdentityStore::new();
        let company = Company::new(CompanyName::parse("Acme").unwrap(), Plan::default(), Utc::now());
        let founder = CompanyMember::founder(CompanyId::new(), user("u1"), Utc::now());

        let err = store.insert_company(company.clone(), founder).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.find_company_by_id(company.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn membership_pair_is_unique() {
        let store = InMemoryIdentityStore::new();
        let company = seed(&store, "Acme", "u1").await;

        let dup = CompanyMember::new(company.id, user("u1"), CompanyRole::Member, Utc::now());
        assert!(matches!(
            store.insert_membership(dup).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.list_memberships_by_company(company.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn membership_for_unknown_company_is_not_found() {
        let store = InMemoryIdentityStore::new();
        let m = CompanyMember::new(CompanyId::new(), user("u1"), CompanyRole::Member, Utc::now());
        assert_eq!(store.insert_membership(m).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn guarded_update_refuses_last_owner() {
        let store = InMemoryIdentityStore::new();
        let company = seed(&store, "Acme", "u1").await;
        let owner = store.find_membership(company.id, &user("u1")).await.unwrap().unwrap();

        let err = store
            .update_membership_role(company.id, owner.id, CompanyRole::Admin)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::LastOwner);

        let after = store.find_membership(company.id, &user("u1")).await.unwrap().unwrap();
        assert_eq!(after.role, CompanyRole::Owner);
    }

    #[tokio::test]
    async fn guarded_delete_frees_the_pair() {
        let store = InMemoryIdentityStore::new();
        let company = seed(&store, "Acme", "u1").await;
        let m = CompanyMember::new(company.id, user("u2"), CompanyRole::Member, Utc::now());
        let m = store.insert_membership(m).await.unwrap();

        store.delete_membership(company.id, m.id).await.unwrap();
        assert!(store.find_membership(company.id, &user("u2")).await.unwrap().is_none());

        // The (company, user) slot can be reused after removal.
        let again = CompanyMember::new(company.id, user("u2"), CompanyRole::Admin, Utc::now());
        assert!(store.insert_membership(again).await.is_ok());
    }

    #[tokio::test]
    async fn guarded_ops_are_scoped_to_the_company() {
        let store = InMemoryIdentityStore::new();
        let a = seed(&store, "Acme", "u1").await;
        let b = seed(&store, "Globex", "u2").await;
        let owner_a = store.find_membership(a.id, &user("u1")).await.unwrap().unwrap();

        assert_eq!(
            store.delete_membership(b.id, owner_a.id).await,
            Err(StoreError::NotFound)
        );
        assert_eq!(
            store
                .update_membership_role(b.id, owner_a.id, CompanyRole::Member)
                .await,
            Err(StoreError::NotFound)
        );
    }
}
