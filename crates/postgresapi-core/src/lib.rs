// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL API Core - Instance Provisioning
//!
//! This crate provisions logical PostgreSQL databases ("instances") on one
//! shared cluster. It canonicalizes caller-supplied names into safe SQL
//! identifiers, derives deterministic credentials from a secret salt, issues
//! the administrative DDL, and keeps a catalog of which instances exist.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        API layer / postgresapi-ctl                  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         InstanceRegistry                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────────┐  │
//! │  │    Name      │  │  Credential  │  │      ClusterManager       │  │
//! │  │Canonicalizer │  │   Deriver    │  │  (connection cache, DDL)  │  │
//! │  └──────────────┘  └──────────────┘  └───────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//!            │ transaction                              │ auto-commit DDL
//!            ▼                                          ▼
//! ┌──────────────────────────┐          ┌───────────────────────────────┐
//! │      Catalog store       │          │        Shared cluster         │
//! │   (`instance` table)     │          │  (databases, group + login    │
//! │                          │          │   roles)                      │
//! └──────────────────────────┘          └───────────────────────────────┘
//! ```
//!
//! # Instance State Machine
//!
//! ```text
//!      ┌─────────┐   create_database + insert + commit   ┌─────────┐
//!      │ PENDING │ ─────────────────────────────────────► │ RUNNING │
//!      └─────────┘                                        └────┬────┘
//!           │ failure: nothing persisted                       │ delete
//!           ▼                                                  ▼
//!       (no record)                                       (no record)
//! ```
//!
//! `ERROR` is a valid stored state with no transition into it.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `POSTGRESAPI_DATABASE_URL` | Yes | - | Catalog store connection string |
//! | `POSTGRESAPI_SALT` | Yes | - | Credential derivation key |
//! | `POSTGRESAPI_SHARED_HOST` | No | `localhost` | Shared cluster host |
//! | `POSTGRESAPI_SHARED_PORT` | No | `5432` | Shared cluster port |
//! | `POSTGRESAPI_SHARED_ADMIN` | No | `postgres` | Admin role |
//! | `POSTGRESAPI_SHARED_ADMIN_PASSWORD` | No | empty | Admin password |
//! | `POSTGRESAPI_SHARED_PUBLIC_HOST` | No | shared host | Host advertised to callers |
//! | `POSTGRESAPI_OPERATION_TIMEOUT_SECS` | No | `30` | Limit per cluster operation |
//! | `POSTGRESAPI_MAX_CACHED_CONNECTIONS` | No | `16` | Connection cache size |
//! | `POSTGRESAPI_RESERVED_NAMES` | No | `postgres,template0,template1` | Names that cannot be provisioned |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Lifecycle error taxonomy
//! - [`naming`]: Name canonicalization and validated identifiers
//! - [`credentials`]: Deterministic credential derivation
//! - [`cluster`]: Administrative DDL against the shared cluster
//! - [`catalog`]: Catalog store of provisioned instances
//! - [`instance`]: Instance lifecycle
//! - [`migrations`]: Catalog schema migrations

#![deny(missing_docs)]

/// Catalog schema migrations.
///
/// ```ignore
/// use postgresapi_core::migrations;
///
/// let pool = PgPool::connect(&database_url).await?;
/// migrations::run(&pool).await?;
/// ```
pub mod migrations;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for lifecycle operations.
pub mod error;

/// Name canonicalization and validated SQL identifiers.
pub mod naming;

/// Credential derivation from a secret salt.
pub mod credentials;

/// Cluster manager, connection seams and backends.
pub mod cluster;

/// Catalog store seams and backends.
pub mod catalog;

/// Instance model and lifecycle operations.
pub mod instance;

pub use catalog::{CatalogStore, MemoryCatalog, PgCatalog};
pub use cluster::{ClusterManager, MockCluster, PgClusterConnector};
pub use config::{Config, SharedClusterConfig};
pub use credentials::{CredentialDeriver, Credentials, UserCredentials};
pub use error::{Error, Result};
pub use instance::{Instance, InstanceRegistry, InstanceState, resolve_cluster_manager};
pub use naming::{Identifier, canonicalize};
