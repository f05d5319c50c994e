//! Configuration loading and representation.
//!
//! Everything comes from environment variables; see [`AppConfig::from_env`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use presenca_observability::{LogConfig, LogFormat};

use crate::store::PostgresOptions;

pub const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is required when {reason}")]
    Missing {
        name: &'static str,
        reason: &'static str,
    },

    #[error("invalid value for {name}: '{value}' ({message})")]
    Invalid {
        name: &'static str,
        value: String,
        message: String,
    },
}

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), doubling up to `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        std::cmp::min(self.base_backoff.saturating_mul(factor), self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres(DatabaseConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl DatabaseConfig {
    pub fn pool_options(&self) -> PostgresOptions {
        PostgresOptions {
            url: self.url.clone(),
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout,
            statement_timeout: self.statement_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub storage: StorageConfig,
    pub retry: RetryPolicy,
    pub seed_schedule: bool,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or(&get, "BIND_ADDR", "0.0.0.0:8080".parse().ok())?;

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let persistent = parse_bool(&get, "USE_PERSISTENT_STORES", false)?;
        let storage = if persistent {
            let url = get("DATABASE_URL").ok_or(ConfigError::Missing {
                name: "DATABASE_URL",
                reason: "USE_PERSISTENT_STORES is enabled",
            })?;
            StorageConfig::Postgres(DatabaseConfig {
                url,
                max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", Some(20))?,
                acquire_timeout: millis_or(&get, "DB_ACQUIRE_TIMEOUT_MS", 2_000)?,
                statement_timeout: millis_or(&get, "DB_STATEMENT_TIMEOUT_MS", 5_000)?,
            })
        } else {
            StorageConfig::InMemory
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_or(&get, "RETRY_MAX_RETRIES", Some(defaults.max_retries))?,
            base_backoff: millis_or(&get, "RETRY_BASE_BACKOFF_MS", 50)?,
            max_backoff: defaults.max_backoff,
        };

        let seed_schedule = parse_bool(&get, "SEED_SCHEDULE", !persistent)?;

        let format: LogFormat = parse_or(&get, "LOG_FORMAT", Some(LogFormat::Json))?;
        let log = LogConfig {
            format,
            ..LogConfig::default()
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            storage,
            retry,
            seed_schedule,
            log,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            message: e.to_string(),
        }),
        None => default.ok_or(ConfigError::Missing {
            name,
            reason: "no default exists",
        }),
    }
}

fn millis_or<G>(get: &G, name: &'static str, default_ms: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, name, Some(default_ms)).map(Duration::from_millis)
}

fn parse_bool<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.clone(),
            message: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_in_memory_dev_setup() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(cfg.storage, StorageConfig::InMemory);
        assert!(cfg.seed_schedule);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn persistent_mode_needs_a_database_url() {
        let err = config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "DATABASE_URL", .. }));

        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "1"),
            ("DATABASE_URL", "postgres://localhost/presenca"),
            ("DB_STATEMENT_TIMEOUT_MS", "750"),
        ])
        .unwrap();
        let StorageConfig::Postgres(db) = cfg.storage else {
            panic!("expected postgres storage");
        };
        assert_eq!(db.max_connections, 20);
        assert_eq!(db.acquire_timeout, Duration::from_secs(2));
        assert_eq!(db.statement_timeout, Duration::from_millis(750));
        assert!(!cfg.seed_schedule);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config(&[("RETRY_MAX_RETRIES", "many")]).is_err());
        assert!(config(&[("SEED_SCHEDULE", "maybe")]).is_err());
        assert!(config(&[("LOG_FORMAT", "xml")]).is_err());
        assert!(config(&[("BIND_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn retry_count_excludes_the_first_attempt() {
        let cfg = config(&[("RETRY_MAX_RETRIES", "1"), ("RETRY_BASE_BACKOFF_MS", "10")]).unwrap();
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.base_backoff, Duration::from_millis(10));
        assert_eq!(config(&[]).unwrap().retry, RetryPolicy::default());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(50));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(40), policy.max_backoff);
    }
}
