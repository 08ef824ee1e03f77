use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use companyhub_infra::{
    AppConfig, IdentityStore, InMemoryIdentityStore, MembershipService, PostgresIdentityStore,
    RetryPolicy, RetryingStore, StoreError,
};

/// The store behind the service, chosen at start-up.
pub type DynStore = Arc<dyn IdentityStore>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("failed to apply schema: {0}")]
    Migrate(#[from] StoreError),
}

/// Shared, immutable handles used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub membership: MembershipService<DynStore>,
}

impl AppServices {
    pub fn new(store: DynStore) -> Self {
        Self {
            membership: MembershipService::new(store),
        }
    }

    /// Services over a fresh in-memory store.
    pub fn in_memory(retry: RetryPolicy) -> Self {
        Self::new(Arc::new(RetryingStore::new(InMemoryIdentityStore::new(), retry)))
    }
}

/// Select and prepare the identity store described by `config`.
///
/// With a database URL the pool is opened and the schema applied before the
/// server accepts traffic; without one the process keeps its state in memory.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory identity store (state is lost on restart)");
        return Ok(AppServices::in_memory(config.retry));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    let store = PostgresIdentityStore::new(pool);
    store.migrate().await?;
    tracing::info!(max_connections = config.db_max_connections, "postgres identity store ready");

    Ok(AppServices::new(Arc::new(RetryingStore::new(store, config.retry))))
}
