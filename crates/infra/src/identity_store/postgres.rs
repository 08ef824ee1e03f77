//! Postgres-backed identity store.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` (membership for a missing company) |
//! | Database (serialization failure / deadlock / lock timeout) | `40001` / `40P01` / `55P03` | `Unavailable` |
//! | Database (other) | any other | `Backend` |
//! | PoolTimedOut / PoolClosed / Io / Tls | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |
//!
//! ## Atomicity
//!
//! Company creation inserts the company and its founding membership in one
//! transaction. Guarded mutations lock the company row (`FOR UPDATE`) before
//! counting Owners, so concurrent guarded mutations of the same company run
//! one after another and each sees the count left by the previous one.
//! The wait for that row lock is bounded by `lock_timeout`; a holder that
//! never lets go surfaces as `Unavailable` instead of blocking forever.
//! A future dropped before commit rolls its transaction back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use companyhub_auth::{CompanyRole, guard_last_owner_removal, guard_role_change};
use companyhub_companies::{Company, CompanyMember, CompanyName, Plan};
use companyhub_core::{CompanyId, MembershipId, UserId};

use super::{IdentityStore, StoreError, StoreResult};

const SCHEMA: &str = include_str!("schema.sql");

const COMPANY_COLUMNS: &str = "id, name, plan, created_at";
const MEMBER_COLUMNS: &str = "id, company_id, user_id, role, created_at";

/// Longest a guarded mutation waits for the company row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Postgres-backed identity store.
///
/// Uniqueness of company names and of `(company_id, user_id)` is enforced by
/// table constraints, not by read-then-insert checks.
#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

/// Lock the company row for the rest of the transaction, waiting at most
/// `lock_timeout` for a concurrent holder.
async fn lock_company(
    tx: &mut Transaction<'_, Postgres>,
    company_id: CompanyId,
    lock_timeout: Duration,
) -> StoreResult<()> {
    // SET does not take bind parameters; the value is an integer we format.
    let set_timeout = format!(
        "SET LOCAL lock_timeout = '{}ms'",
        lock_timeout.as_millis().max(1)
    );
    sqlx::query(&set_timeout)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

    sqlx::query("SELECT id FROM companies WHERE id = $1 FOR UPDATE")
        .bind(company_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_company", e))?
        .map(|_| ())
        .ok_or(StoreError::NotFound)
}

async fn member_role_in(
    tx: &mut Transaction<'_, Postgres>,
    company_id: CompanyId,
    membership_id: MembershipId,
) -> StoreResult<CompanyRole> {
    let row = sqlx::query("SELECT role FROM company_members WHERE id = $1 AND company_id = $2")
        .bind(membership_id.as_uuid())
        .bind(company_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("member_role", e))?
        .ok_or(StoreError::NotFound)?;
    let role: String = row
        .try_get("role")
        .map_err(|e| map_sqlx_error("member_role", e))?;
    parse_role(&role)
}

async fn owner_count_in(tx: &mut Transaction<'_, Postgres>, company_id: CompanyId) -> StoreResult<u64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS owners FROM company_members WHERE company_id = $1 AND role = 'owner'",
    )
    .bind(company_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("count_owners", e))?;
    let owners: i64 = row
        .try_get("owners")
        .map_err(|e| map_sqlx_error("count_owners", e))?;
    Ok(owners.max(0) as u64)
}

async fn rollback(tx: Transaction<'_, Postgres>, err: StoreError) -> StoreError {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed; the connection will discard the transaction");
    }
    err
}

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    #[instrument(skip(self), fields(name = %name))]
    async fn find_company_by_name(&self, name: &CompanyName) -> StoreResult<Option<Company>> {
        let row = sqlx::query(&format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE name = $1"))
            .bind(name.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_company_by_name", e))?;
        row.as_ref().map(company_from_row).transpose()
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn find_company_by_id(&self, company_id: CompanyId) -> StoreResult<Option<Company>> {
        let row = sqlx::query(&format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1"))
            .bind(company_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_company_by_id", e))?;
        row.as_ref().map(company_from_row).transpose()
    }

    #[instrument(skip(self, company, founder), fields(company_id = %company.id, founder = %founder.user_id))]
    async fn insert_company(&self, company: Company, founder: CompanyMember) -> StoreResult<Company> {
        if founder.company_id != company.id {
            return Err(StoreError::Backend(
                "founding membership belongs to a different company".to_string(),
            ));
        }

        let mut tx = self.begin("insert_company").await?;

        let inserted = sqlx::query(
            "INSERT INTO companies (id, name, plan, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(company.id.as_uuid())
        .bind(company.name.as_str())
        .bind(company.plan.as_str())
        .bind(company.created_at)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            return Err(rollback(tx, map_sqlx_error("insert_company", e)).await);
        }

        if let Err(e) = insert_member_query(&founder).execute(&mut *tx).await {
            return Err(rollback(tx, map_sqlx_error("insert_founder", e)).await);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_insert_company", e))?;
        Ok(company)
    }

    #[instrument(skip(self, member), fields(company_id = %member.company_id, user_id = %member.user_id))]
    async fn insert_membership(&self, member: CompanyMember) -> StoreResult<CompanyMember> {
        insert_member_query(&member)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_membership", e))?;
        Ok(member)
    }

    #[instrument(skip(self), fields(company_id = %company_id, user_id = %user_id))]
    async fn find_membership(
        &self,
        company_id: CompanyId,
        user_id: &UserId,
    ) -> StoreResult<Option<CompanyMember>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM company_members WHERE company_id = $1 AND user_id = $2"
        ))
        .bind(company_id.as_uuid())
        .bind(user_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_membership", e))?;
        row.as_ref().map(member_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_memberships_by_user(&self, user_id: &UserId) -> StoreResult<Vec<CompanyMember>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM company_members WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_memberships_by_user", e))?;
        rows.iter().map(member_from_row).collect()
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn list_memberships_by_company(
        &self,
        company_id: CompanyId,
    ) -> StoreResult<Vec<CompanyMember>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM company_members WHERE company_id = $1 ORDER BY id"
        ))
        .bind(company_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_memberships_by_company", e))?;
        rows.iter().map(member_from_row).collect()
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn count_owners(&self, company_id: CompanyId) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS owners FROM company_members WHERE company_id = $1 AND role = 'owner'",
        )
        .bind(company_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_owners", e))?;
        let owners: i64 = row
            .try_get("owners")
            .map_err(|e| map_sqlx_error("count_owners", e))?;
        Ok(owners.max(0) as u64)
    }

    #[instrument(skip(self), fields(company_id = %company_id, membership_id = %membership_id, role = %role))]
    async fn update_membership_role(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
        role: CompanyRole,
    ) -> StoreResult<()> {
        let mut tx = self.begin("update_membership_role").await?;

        if let Err(e) = lock_company(&mut tx, company_id, self.lock_timeout).await {
            return Err(rollback(tx, e).await);
        }
        let current = match member_role_in(&mut tx, company_id, membership_id).await {
            Ok(r) => r,
            Err(e) => return Err(rollback(tx, e).await),
        };
        let owners = match owner_count_in(&mut tx, company_id).await {
            Ok(n) => n,
            Err(e) => return Err(rollback(tx, e).await),
        };
        if !guard_role_change(current, role, owners).is_allowed() {
            return Err(rollback(tx, StoreError::LastOwner).await);
        }

        let updated = sqlx::query("UPDATE company_members SET role = $1 WHERE id = $2 AND company_id = $3")
            .bind(role_to_db(role))
            .bind(membership_id.as_uuid())
            .bind(company_id.as_uuid())
            .execute(&mut *tx)
            .await;
        if let Err(e) = updated {
            return Err(rollback(tx, map_sqlx_error("update_membership_role", e)).await);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_update_membership_role", e))
    }

    #[instrument(skip(self), fields(company_id = %company_id, membership_id = %membership_id))]
    async fn delete_membership(
        &self,
        company_id: CompanyId,
        membership_id: MembershipId,
    ) -> StoreResult<()> {
        let mut tx = self.begin("delete_membership").await?;

        if let Err(e) = lock_company(&mut tx, company_id, self.lock_timeout).await {
            return Err(rollback(tx, e).await);
        }
        let current = match member_role_in(&mut tx, company_id, membership_id).await {
            Ok(r) => r,
            Err(e) => return Err(rollback(tx, e).await),
        };
        let owners = match owner_count_in(&mut tx, company_id).await {
            Ok(n) => n,
            Err(e) => return Err(rollback(tx, e).await),
        };
        if !guard_last_owner_removal(current, owners).is_allowed() {
            return Err(rollback(tx, StoreError::LastOwner).await);
        }

        let deleted = sqlx::query("DELETE FROM company_members WHERE id = $1 AND company_id = $2")
            .bind(membership_id.as_uuid())
            .bind(company_id.as_uuid())
            .execute(&mut *tx)
            .await;
        if let Err(e) = deleted {
            return Err(rollback(tx, map_sqlx_error("delete_membership", e)).await);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_delete_membership", e))
    }
}

fn insert_member_query(
    member: &CompanyMember,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        "INSERT INTO company_members (id, company_id, user_id, role, created_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(*member.id.as_uuid())
    .bind(*member.company_id.as_uuid())
    .bind(member.user_id.as_str())
    .bind(role_to_db(member.role))
    .bind(member.created_at)
}

fn role_to_db(role: CompanyRole) -> &'static str {
    match role {
        CompanyRole::Owner => "owner",
        CompanyRole::Admin => "admin",
        CompanyRole::Manager => "manager",
        CompanyRole::Member => "member",
    }
}

fn parse_role(raw: &str) -> StoreResult<CompanyRole> {
    raw.parse()
        .map_err(|e| StoreError::Backend(format!("corrupt membership row: {e}")))
}

fn company_from_row(row: &PgRow) -> StoreResult<Company> {
    let read = |e| map_sqlx_error("read_company_row", e);
    let id: Uuid = row.try_get("id").map_err(read)?;
    let name: String = row.try_get("name").map_err(read)?;
    let plan: String = row.try_get("plan").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    let corrupt = |e| StoreError::Backend(format!("corrupt company row {id}: {e}"));
    Ok(Company {
        id: CompanyId::from_uuid(id),
        name: CompanyName::parse(&name).map_err(corrupt)?,
        plan: Plan::parse(&plan).map_err(corrupt)?,
        created_at,
    })
}

fn member_from_row(row: &PgRow) -> StoreResult<CompanyMember> {
    let read = |e| map_sqlx_error("read_member_row", e);
    let id: Uuid = row.try_get("id").map_err(read)?;
    let company_id: Uuid = row.try_get("company_id").map_err(read)?;
    let user_id: String = row.try_get("user_id").map_err(read)?;
    let role: String = row.try_get("role").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    Ok(CompanyMember {
        id: MembershipId::from_uuid(id),
        company_id: CompanyId::from_uuid(company_id),
        user_id: UserId::parse(user_id)
            .map_err(|e| StoreError::Backend(format!("corrupt membership row {id}: {e}")))?,
        role: parse_role(&role)?,
        created_at,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            let err = error_for_code(db_err.code().as_deref(), db_err.constraint(), msg);
            if let StoreError::Backend(msg) = &err {
                tracing::error!(operation, error = %msg, "database error");
            }
            err
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        other => {
            tracing::error!(operation, error = %other, "sqlx error");
            StoreError::Backend(format!("sqlx error in {operation}: {other}"))
        }
    }
}

/// Classify a PostgreSQL error by SQLSTATE.
fn error_for_code(code: Option<&str>, constraint: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("23505") => StoreError::Conflict(conflict_message(constraint)),
        Some("23503") => StoreError::NotFound,
        // serialization failure, deadlock, lock_timeout expired
        Some("40001") | Some("40P01") | Some("55P03") => StoreError::Unavailable(msg),
        _ => StoreError::Backend(msg),
    }
}

fn conflict_message(constraint: Option<&str>) -> String {
    match constraint {
        Some("companies_name_key") => "company name already taken".to_string(),
        Some("company_members_company_user_key") => "user already a member".to_string(),
        Some(other) => format!("unique constraint '{other}' violated"),
        None => "unique constraint violated".to_string(),
    }
}

#[cfg(test)]
mod tests {
    //! Tests that need a real database are `#[ignore]`d; run them with
    //! `TEST_DATABASE_URL=postgres://... cargo test -p companyhub-infra -- --ignored`.

    use super::*;

    async fn connect() -> PostgresIdentityStore {
        let url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must point at a scratch database");
        let pool = PgPool::connect(&url).await.expect("connect to TEST_DATABASE_URL");
        let store = PostgresIdentityStore::new(pool);
        store.migrate().await.expect("apply schema");
        store
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn unique_name(prefix: &str) -> CompanyName {
        CompanyName::parse(&format!("{prefix}-{}", Uuid::now_v7())).unwrap()
    }

    async fn seed(store: &PostgresIdentityStore, owner: &str) -> Company {
        let company = Company::new(unique_name("pg"), Plan::default(), Utc::now());
        let founder = CompanyMember::founder(company.id, user(owner), Utc::now());
        store.insert_company(company, founder).await.unwrap()
    }

    #[test]
    fn role_storage_form_round_trips() {
        for role in CompanyRole::ALL {
            assert_eq!(parse_role(role_to_db(role)).unwrap(), role);
        }
    }

    #[test]
    fn lock_and_serialization_failures_are_transient() {
        for code in ["40001", "40P01", "55P03"] {
            let err = error_for_code(Some(code), None, "boom".into());
            assert!(err.is_transient(), "{code}");
        }
        assert_eq!(error_for_code(Some("23503"), None, "fk".into()), StoreError::NotFound);
        assert_eq!(
            error_for_code(Some("42P01"), None, "missing table".into()),
            StoreError::Backend("missing table".into())
        );
    }

    #[test]
    fn conflict_messages_name_the_constraint() {
        assert_eq!(conflict_message(Some("companies_name_key")), "company name already taken");
        assert_eq!(
            conflict_message(Some("company_members_company_user_key")),
            "user already a member"
        );
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn duplicate_name_is_conflict() {
        let store = connect().await;
        let first = seed(&store, "u1").await;

        let again = Company::new(first.name.clone(), Plan::default(), Utc::now());
        let founder = CompanyMember::founder(again.id, user("u2"), Utc::now());
        let err = store.insert_company(again.clone(), founder).await.unwrap_err();

        assert_eq!(err, StoreError::Conflict("company name already taken".into()));
        assert!(store.find_company_by_id(again.id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn founder_failure_rolls_back_company() {
        let store = connect().await;
        let company = Company::new(unique_name("pg-rollback"), Plan::default(), Utc::now());
        let mut founder = CompanyMember::founder(company.id, user("u1"), Utc::now());
        // Reuse an existing membership id so the second insert fails.
        let existing = seed(&store, "u0").await;
        founder.id = store
            .find_membership(existing.id, &user("u0"))
            .await
            .unwrap()
            .unwrap()
            .id;

        assert!(store.insert_company(company.clone(), founder).await.is_err());
        assert!(store.find_company_by_id(company.id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn membership_for_missing_company_is_not_found() {
        let store = connect().await;
        let m = CompanyMember::new(CompanyId::new(), user("u1"), CompanyRole::Member, Utc::now());
        assert_eq!(store.insert_membership(m).await, Err(StoreError::NotFound));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn concurrent_owner_demotions_keep_one_owner() {
        let store = connect().await;
        let store = Arc::new(store);
        let company = seed(&store, "u1").await;
        let second = CompanyMember::new(company.id, user("u2"), CompanyRole::Owner, Utc::now());
        store.insert_membership(second).await.unwrap();

        let members = store.list_memberships_by_company(company.id).await.unwrap();
        let mut handles = Vec::new();
        for round in 0..8 {
            for m in &members {
                let store = store.clone();
                let (company_id, id) = (company.id, m.id);
                handles.push(tokio::spawn(async move {
                    if round % 2 == 0 {
                        store.update_membership_role(company_id, id, CompanyRole::Admin).await
                    } else {
                        store.delete_membership(company_id, id).await
                    }
                }));
            }
        }
        for h in handles {
            match h.await.unwrap() {
                Ok(()) | Err(StoreError::LastOwner) | Err(StoreError::NotFound) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(store.count_owners(company.id).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "needs TEST_DATABASE_URL"]
    async fn stuck_lock_holder_times_out_as_unavailable() {
        let store = connect()
            .await
            .with_lock_timeout(Duration::from_millis(100));
        let company = seed(&store, "u1").await;
        let second = CompanyMember::new(company.id, user("u2"), CompanyRole::Owner, Utc::now());
        let second = store.insert_membership(second).await.unwrap();

        let mut holder = store.pool.begin().await.unwrap();
        sqlx::query("SELECT id FROM companies WHERE id = $1 FOR UPDATE")
            .bind(company.id.as_uuid())
            .fetch_one(&mut *holder)
            .await
            .unwrap();

        let err = store
            .update_membership_role(company.id, second.id, CompanyRole::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)), "{err}");

        holder.rollback().await.unwrap();
        assert_eq!(store.count_owners(company.id).await.unwrap(), 2);
    }
}
