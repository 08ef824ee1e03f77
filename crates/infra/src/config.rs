//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::identity_store::RetryPolicy;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

/// Runtime settings for the API process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub retry: RetryPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable source.
    ///
    /// Unset and blank variables fall back to their defaults. `DB_CONN` is
    /// accepted when `DATABASE_URL` is absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", format!("{raw:?}: {e}")))?,
            None => DEFAULT_BIND_ADDR
                .parse()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", format!("{e}")))?,
        };

        let database_url = get("DATABASE_URL").or_else(|| get("DB_CONN"));

        let db_max_connections = parse_number(
            "DB_MAX_CONNECTIONS",
            get("DB_MAX_CONNECTIONS"),
            DEFAULT_DB_MAX_CONNECTIONS,
        )?;
        if db_max_connections == 0 {
            return Err(ConfigError::invalid("DB_MAX_CONNECTIONS", "must be at least 1"));
        }

        let defaults = RetryPolicy::default();
        let max_attempts = parse_number(
            "STORE_RETRY_ATTEMPTS",
            get("STORE_RETRY_ATTEMPTS"),
            defaults.max_attempts,
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::invalid("STORE_RETRY_ATTEMPTS", "must be at least 1"));
        }
        let base_ms = parse_number(
            "STORE_RETRY_BASE_MS",
            get("STORE_RETRY_BASE_MS"),
            defaults.base_delay.as_millis() as u64,
        )?;

        Ok(Self {
            bind_addr,
            database_url,
            db_max_connections,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: defaults.max_delay,
            },
        })
    }
}

fn parse_number<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::invalid(var, format!("{raw:?}: {e}"))),
        None => Ok(default),
    }
}
