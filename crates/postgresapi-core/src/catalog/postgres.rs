// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed catalog store.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::{CatalogError, CatalogStore, CatalogTransaction, InstanceRecord};

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

/// Catalog store on the `instance` table.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Create a catalog on `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, CatalogError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCatalogTransaction { tx }))
    }
}

/// Open transaction on the catalog pool.
pub struct PgCatalogTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTransaction for PgCatalogTransaction {
    async fn exists(&mut self, name: &str) -> Result<bool, CatalogError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM instance WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }

    async fn fetch(&mut self, name: &str) -> Result<Option<InstanceRecord>, CatalogError> {
        let row: Option<(String, String, bool)> =
            sqlx::query_as("SELECT name, state, shared FROM instance WHERE name = $1")
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await?;

        row.map(|(name, state, shared)| {
            let state = state.parse().map_err(CatalogError::InvalidState)?;
            Ok(InstanceRecord {
                name,
                state,
                shared,
            })
        })
        .transpose()
    }

    async fn insert(&mut self, record: &InstanceRecord) -> Result<(), CatalogError> {
        sqlx::query("INSERT INTO instance (name, state, shared) VALUES ($1, $2, $3)")
            .bind(&record.name)
            .bind(record.state.as_str())
            .bind(record.shared)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CatalogError::Duplicate(record.name.clone())
                } else {
                    CatalogError::Database(e)
                }
            })?;
        Ok(())
    }

    async fn delete(&mut self, name: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("DELETE FROM instance WHERE name = $1")
            .bind(name)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), CatalogError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), CatalogError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
