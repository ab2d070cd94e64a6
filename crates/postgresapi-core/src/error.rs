// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for postgresapi-core.
//!
//! Every lifecycle failure carries the name of the instance it concerns, so
//! the API layer can report it without extra context.

use std::time::Duration;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::cluster::ClusterError;

/// Result type using the lifecycle [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Instance lifecycle errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The name cannot be provisioned.
    #[error("Invalid instance name '{name}': {reason}")]
    InvalidInstanceName {
        /// Name as supplied, or its canonical form once computed.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A catalog record or physical database with this name already exists.
    #[error("Instance '{name}' already exists")]
    InstanceAlreadyExists {
        /// Canonical instance name.
        name: String,
    },

    /// No catalog record with this name exists.
    #[error("Instance '{name}' not found")]
    InstanceNotFound {
        /// Canonical instance name.
        name: String,
    },

    /// The cluster rejected physical provisioning.
    #[error("Failed to create database for instance '{name}': {source}")]
    DatabaseCreation {
        /// Canonical instance name.
        name: String,
        /// Cluster failure.
        #[source]
        source: ClusterError,
    },

    /// The instance is not on the shared cluster.
    #[error("Instance '{name}' is not shared; dedicated clusters are not supported")]
    UnsupportedTopology {
        /// Canonical instance name.
        name: String,
    },

    /// A cluster operation did not finish in time.
    #[error("Instance '{name}': {operation} timed out after {timeout:?}")]
    Timeout {
        /// Canonical instance name.
        name: String,
        /// Cluster operation that timed out.
        operation: &'static str,
        /// Configured limit.
        timeout: Duration,
    },

    /// A cluster operation other than database creation failed.
    #[error("Cluster error for instance '{name}': {source}")]
    Cluster {
        /// Canonical instance name.
        name: String,
        /// Cluster failure.
        #[source]
        source: ClusterError,
    },

    /// The catalog store failed.
    #[error("Catalog error for instance '{name}': {source}")]
    Catalog {
        /// Canonical instance name.
        name: String,
        /// Catalog failure.
        #[source]
        source: CatalogError,
    },
}

impl Error {
    /// Stable error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInstanceName { .. } => "INVALID_INSTANCE_NAME",
            Self::InstanceAlreadyExists { .. } => "INSTANCE_ALREADY_EXISTS",
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::DatabaseCreation { .. } => "DATABASE_CREATION_FAILED",
            Self::UnsupportedTopology { .. } => "UNSUPPORTED_TOPOLOGY",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cluster { .. } => "CLUSTER_ERROR",
            Self::Catalog { .. } => "CATALOG_ERROR",
        }
    }

    /// Name of the instance the error concerns.
    pub fn instance_name(&self) -> &str {
        match self {
            Self::InvalidInstanceName { name, .. }
            | Self::InstanceAlreadyExists { name }
            | Self::InstanceNotFound { name }
            | Self::DatabaseCreation { name, .. }
            | Self::UnsupportedTopology { name }
            | Self::Timeout { name, .. }
            | Self::Cluster { name, .. }
            | Self::Catalog { name, .. } => name,
        }
    }

    /// Wrap a cluster failure, keeping timeouts distinct.
    pub(crate) fn cluster(name: &str, source: ClusterError) -> Self {
        match source {
            ClusterError::Timeout { operation, timeout } => Self::Timeout {
                name: name.to_string(),
                operation,
                timeout,
            },
            source => Self::Cluster {
                name: name.to_string(),
                source,
            },
        }
    }

    pub(crate) fn catalog(name: &str, source: CatalogError) -> Self {
        Self::Catalog {
            name: name.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                Error::InvalidInstanceName {
                    name: "foo".to_string(),
                    reason: "reserved".to_string(),
                },
                "INVALID_INSTANCE_NAME",
            ),
            (
                Error::InstanceAlreadyExists {
                    name: "foo".to_string(),
                },
                "INSTANCE_ALREADY_EXISTS",
            ),
            (
                Error::InstanceNotFound {
                    name: "foo".to_string(),
                },
                "INSTANCE_NOT_FOUND",
            ),
            (
                Error::DatabaseCreation {
                    name: "foo".to_string(),
                    source: ClusterError::Statement("boom".to_string()),
                },
                "DATABASE_CREATION_FAILED",
            ),
            (
                Error::UnsupportedTopology {
                    name: "foo".to_string(),
                },
                "UNSUPPORTED_TOPOLOGY",
            ),
            (
                Error::catalog("foo", CatalogError::Unavailable("down".to_string())),
                "CATALOG_ERROR",
            ),
        ];

        for (err, expected) in test_cases {
            assert_eq!(err.error_code(), expected, "wrong code for {err}");
            assert_eq!(err.instance_name(), "foo");
        }
    }

    #[test]
    fn test_messages_name_the_instance() {
        let err = Error::InstanceNotFound {
            name: "orders".to_string(),
        };
        assert_eq!(err.to_string(), "Instance 'orders' not found");

        let err = Error::DatabaseCreation {
            name: "orders".to_string(),
            source: ClusterError::Statement("disk full".to_string()),
        };
        assert!(err.to_string().contains("'orders'"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_cluster_timeout_becomes_timeout() {
        let err = Error::cluster(
            "orders",
            ClusterError::Timeout {
                operation: "drop_database",
                timeout: Duration::from_secs(3),
            },
        );
        assert!(matches!(
            err,
            Error::Timeout {
                operation: "drop_database",
                ..
            }
        ));
        assert_eq!(err.instance_name(), "orders");

        let err = Error::cluster("orders", ClusterError::InUse("orders".to_string()));
        assert_eq!(err.error_code(), "CLUSTER_ERROR");
    }
}
