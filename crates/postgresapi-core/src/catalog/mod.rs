// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Catalog store interfaces and backends.
//!
//! The catalog is the source of truth for which instances exist. All
//! lifecycle writes go through a [`CatalogTransaction`].

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryCatalog;
pub use self::postgres::PgCatalog;

use async_trait::async_trait;
use thiserror::Error;

use crate::instance::InstanceState;

/// Errors from catalog operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record with this name already exists.
    #[error("Duplicate instance record: {0}")]
    Duplicate(String),

    /// A stored state value is not one of pending/running/error.
    #[error("Invalid stored state: {0}")]
    InvalidState(String),

    /// The store could not complete the request.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// One row of the `instance` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Canonical instance name.
    pub name: String,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Whether the instance lives on the shared cluster.
    pub shared: bool,
}

/// Transactional access to the catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, CatalogError>;
}

/// An open catalog transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back.
#[async_trait]
pub trait CatalogTransaction: Send {
    /// Whether a record named `name` exists.
    async fn exists(&mut self, name: &str) -> Result<bool, CatalogError>;

    /// Load the record named `name`.
    async fn fetch(&mut self, name: &str) -> Result<Option<InstanceRecord>, CatalogError>;

    /// Insert a new record.
    async fn insert(&mut self, record: &InstanceRecord) -> Result<(), CatalogError>;

    /// Delete the record named `name`, returning whether one existed.
    async fn delete(&mut self, name: &str) -> Result<bool, CatalogError>;

    /// Make every change of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<(), CatalogError>;

    /// Discard every change of this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), CatalogError>;
}
