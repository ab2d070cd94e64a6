// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL cluster connector.
//!
//! Each connection is a small lazily-connected [`PgPool`] bound to one
//! database. Statements go through the simple query protocol outside any
//! explicit transaction, so every statement commits on its own, which is what
//! `CREATE DATABASE` requires.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::traits::*;
use crate::config::SharedClusterConfig;

/// Sessions kept per database handle.
const MAX_SESSIONS_PER_DATABASE: u32 = 2;

impl From<sqlx::Error> for ClusterError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                match db.code().as_deref() {
                    // duplicate_database, duplicate_object
                    Some("42P04") | Some("42710") => ClusterError::AlreadyExists(message),
                    // invalid_catalog_name, undefined_object
                    Some("3D000") | Some("42704") => ClusterError::DoesNotExist(message),
                    // object_in_use, dependent_objects_still_exist
                    Some("55006") | Some("2BP01") => ClusterError::InUse(message),
                    _ if message.contains("already exists") => {
                        ClusterError::AlreadyExists(message)
                    }
                    _ => ClusterError::Statement(message),
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => ClusterError::Connection(err.to_string()),
            _ => ClusterError::Statement(err.to_string()),
        }
    }
}

/// Opens [`PgClusterConnection`]s with the shared cluster's admin credential.
#[derive(Clone)]
pub struct PgClusterConnector {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl fmt::Debug for PgClusterConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgClusterConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl PgClusterConnector {
    /// Create a connector from shared-cluster settings.
    pub fn new(shared: &SharedClusterConfig) -> Self {
        Self {
            host: shared.host.clone(),
            port: shared.port,
            user: shared.admin_user.clone(),
            password: shared.admin_password.clone(),
        }
    }

    fn options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
    }
}

#[async_trait]
impl ClusterConnector for PgClusterConnector {
    fn connector_type(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, database: &str) -> Result<Arc<dyn ClusterConnection>> {
        debug!(host = %self.host, port = self.port, database, "Opening cluster handle");
        let pool = PgPoolOptions::new()
            .max_connections(MAX_SESSIONS_PER_DATABASE)
            .connect_lazy_with(self.options(database));
        Ok(Arc::new(PgClusterConnection { pool }))
    }
}

/// Auto-committing handle on one database.
pub struct PgClusterConnection {
    pool: PgPool,
}

#[async_trait]
impl ClusterConnection for PgClusterConnection {
    async fn execute(&self, statement: &Statement) -> Result<()> {
        let sql = statement.render();
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
