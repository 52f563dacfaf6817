//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::str::FromStr;

use ske_core::PaginationPolicy;
use ske_core::pagination::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub pagination: PaginationPolicy,
    /// Consumer name within the ingest consumer group.
    pub ingest_consumer: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or("BIND_ADDR", &lookup, "0.0.0.0:8080".parse().ok())?;
        let use_persistent_stores = parse_or("USE_PERSISTENT_STORES", &lookup, Some(false))?;
        let default_limit = parse_or("LIST_DEFAULT_LIMIT", &lookup, Some(DEFAULT_LIST_LIMIT))?;
        let max_limit: u32 = parse_or("LIST_MAX_LIMIT", &lookup, Some(MAX_LIST_LIMIT))?;

        let pagination =
            PaginationPolicy::new(default_limit, max_limit).map_err(|e| ConfigError::Invalid {
                var: "LIST_MAX_LIMIT",
                value: max_limit.to_string(),
                reason: e.to_string(),
            })?;

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            pagination,
            ingest_consumer: lookup("INGEST_CONSUMER")
                .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::now_v7())),
        })
    }

    /// In-memory everything, ephemeral port. Used by tests.
    pub fn in_memory() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            use_persistent_stores: false,
            database_url: None,
            redis_url: "redis://localhost:6379".to_string(),
            pagination: PaginationPolicy::default(),
            ingest_consumer: "consumer-test".to_string(),
        }
    }
}

fn parse_or<T, F>(var: &'static str, lookup: &F, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
        None => default.ok_or(ConfigError::Missing(var)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(!cfg.use_persistent_stores);
        assert_eq!(cfg.redis_url, "redis://localhost:6379");
        assert_eq!(cfg.pagination, PaginationPolicy::default());
        assert!(cfg.ingest_consumer.starts_with("consumer-"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("LIST_DEFAULT_LIMIT", "5"),
            ("LIST_MAX_LIMIT", "50"),
            ("INGEST_CONSUMER", "worker-a"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.pagination.default_limit, 5);
        assert_eq!(cfg.pagination.max_limit, 50);
        assert_eq!(cfg.ingest_consumer, "worker-a");
    }

    #[test]
    fn unparseable_values_are_errors() {
        let err = config(&[("LIST_MAX_LIMIT", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LIST_MAX_LIMIT", .. }));

        let err = config(&[("USE_PERSISTENT_STORES", "yes please")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "USE_PERSISTENT_STORES", .. }));
    }

    #[test]
    fn zero_max_limit_is_rejected() {
        assert!(config(&[("LIST_MAX_LIMIT", "0")]).is_err());
    }

    #[test]
    fn persistent_mode_requires_database_url() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/ske"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/ske"));
    }
}
