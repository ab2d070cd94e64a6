// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.
//!
//! The configuration is built once at process start and passed explicitly to
//! the cluster manager and instance registry.

use std::fmt;
use std::time::Duration;

/// Connection settings for the shared cluster.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedClusterConfig {
    /// Host the admin connection goes to.
    pub host: String,
    /// Port the admin connection goes to.
    pub port: u16,
    /// Admin role name.
    pub admin_user: String,
    /// Admin role password.
    pub admin_password: String,
    /// Host advertised to callers, if different from `host`.
    pub public_host: Option<String>,
}

impl SharedClusterConfig {
    /// Host advertised to external callers.
    pub fn public_host(&self) -> &str {
        self.public_host.as_deref().unwrap_or(&self.host)
    }
}

impl Default for SharedClusterConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            admin_user: "postgres".to_string(),
            admin_password: String::new(),
            public_host: None,
        }
    }
}

impl fmt::Debug for SharedClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClusterConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .field("public_host", &self.public_host)
            .finish()
    }
}

/// Provisioning service configuration
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL URL of the catalog store
    pub database_url: String,
    /// Key for credential derivation
    pub salt: String,
    /// Shared cluster settings
    pub shared: SharedClusterConfig,
    /// Upper bound for one cluster operation
    pub operation_timeout: Duration,
    /// Most connection handles one cluster manager keeps open
    pub max_cached_connections: usize,
    /// Canonical names that may not be provisioned
    pub reserved_names: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("salt", &"<redacted>")
            .field("shared", &self.shared)
            .field("operation_timeout", &self.operation_timeout)
            .field("max_cached_connections", &self.max_cached_connections)
            .field("reserved_names", &self.reserved_names)
            .finish()
    }
}

/// Names reserved unless `POSTGRESAPI_RESERVED_NAMES` says otherwise.
pub const DEFAULT_RESERVED_NAMES: &[&str] = &["postgres", "template0", "template1"];

const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CACHED_CONNECTIONS: usize = 16;

impl Config {
    /// Configuration with defaults for everything but the catalog URL, the
    /// salt and the shared cluster.
    pub fn new(
        database_url: impl Into<String>,
        salt: impl Into<String>,
        shared: SharedClusterConfig,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            salt: salt.into(),
            shared,
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            max_cached_connections: DEFAULT_MAX_CACHED_CONNECTIONS,
            reserved_names: DEFAULT_RESERVED_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `POSTGRESAPI_DATABASE_URL`: catalog store connection string
    /// - `POSTGRESAPI_SALT`: credential derivation key
    ///
    /// Optional (with defaults):
    /// - `POSTGRESAPI_SHARED_HOST` (default: localhost)
    /// - `POSTGRESAPI_SHARED_PORT` (default: 5432)
    /// - `POSTGRESAPI_SHARED_ADMIN` (default: postgres)
    /// - `POSTGRESAPI_SHARED_ADMIN_PASSWORD` (default: empty)
    /// - `POSTGRESAPI_SHARED_PUBLIC_HOST` (default: unset)
    /// - `POSTGRESAPI_OPERATION_TIMEOUT_SECS` (default: 30)
    /// - `POSTGRESAPI_MAX_CACHED_CONNECTIONS` (default: 16)
    /// - `POSTGRESAPI_RESERVED_NAMES`: comma-separated (default: postgres,template0,template1)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("POSTGRESAPI_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("POSTGRESAPI_DATABASE_URL"))?;

        let salt = std::env::var("POSTGRESAPI_SALT")
            .map_err(|_| ConfigError::Missing("POSTGRESAPI_SALT"))?;

        let defaults = SharedClusterConfig::default();

        let port: u16 = match std::env::var("POSTGRESAPI_SHARED_PORT") {
            Ok(value) => value.parse().map_err(|_| {
                ConfigError::Invalid("POSTGRESAPI_SHARED_PORT", "must be a valid port number")
            })?,
            Err(_) => defaults.port,
        };

        let shared = SharedClusterConfig {
            host: std::env::var("POSTGRESAPI_SHARED_HOST").unwrap_or(defaults.host),
            port,
            admin_user: std::env::var("POSTGRESAPI_SHARED_ADMIN").unwrap_or(defaults.admin_user),
            admin_password: std::env::var("POSTGRESAPI_SHARED_ADMIN_PASSWORD")
                .unwrap_or(defaults.admin_password),
            public_host: std::env::var("POSTGRESAPI_SHARED_PUBLIC_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
        };

        let mut config = Self::new(database_url, salt, shared);

        if let Ok(value) = std::env::var("POSTGRESAPI_OPERATION_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| {
                ConfigError::Invalid(
                    "POSTGRESAPI_OPERATION_TIMEOUT_SECS",
                    "must be a positive integer",
                )
            })?;
            if secs == 0 {
                return Err(ConfigError::Invalid(
                    "POSTGRESAPI_OPERATION_TIMEOUT_SECS",
                    "must be a positive integer",
                ));
            }
            config.operation_timeout = Duration::from_secs(secs);
        }

        if let Ok(value) = std::env::var("POSTGRESAPI_MAX_CACHED_CONNECTIONS") {
            let max: usize = value.parse().map_err(|_| {
                ConfigError::Invalid(
                    "POSTGRESAPI_MAX_CACHED_CONNECTIONS",
                    "must be a positive integer",
                )
            })?;
            if max == 0 {
                return Err(ConfigError::Invalid(
                    "POSTGRESAPI_MAX_CACHED_CONNECTIONS",
                    "must be a positive integer",
                ));
            }
            config.max_cached_connections = max;
        }

        if let Ok(value) = std::env::var("POSTGRESAPI_RESERVED_NAMES") {
            config.reserved_names = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
