//! Infrastructure layer: identity store adapters, configuration and the
//! membership service that orchestrates the role policy against the store.

pub mod config;
pub mod identity_store;
mod lifecycle;
pub mod membership_service;


pub use config::{AppConfig, ConfigError};
pub use identity_store::{
    IdentityStore, InMemoryIdentityStore, PostgresIdentityStore, RetryPolicy, RetryingStore,
    StoreError, StoreResult,
};
pub use membership_service::{MembershipError, MembershipService};
