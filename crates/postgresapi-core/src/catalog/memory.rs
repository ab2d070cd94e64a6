// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory catalog for testing.
//!
//! Transactions stage their writes and apply them on commit. A commit failure
//! can be injected to exercise the window between cluster DDL and the catalog
//! commit.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{CatalogError, CatalogStore, CatalogTransaction, InstanceRecord};

/// In-memory catalog for testing.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    records: Arc<Mutex<BTreeMap<String, InstanceRecord>>>,
    fail_next_commit: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail and discard its changes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make `begin` fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Committed record named `name`.
    pub async fn get(&self, name: &str) -> Option<InstanceRecord> {
        self.records.lock().await.get(name).cloned()
    }

    /// Insert a committed record directly.
    pub async fn seed(&self, record: InstanceRecord) {
        self.records
            .lock()
            .await
            .insert(record.name.clone(), record);
    }

    /// Number of committed records.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether no records are committed.
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, CatalogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable(
                "memory catalog is unavailable".to_string(),
            ));
        }
        Ok(Box::new(MemoryTransaction {
            catalog: self.clone(),
            staged: BTreeMap::new(),
        }))
    }
}

/// Staged writes of one transaction. `None` marks a deletion.
pub struct MemoryTransaction {
    catalog: MemoryCatalog,
    staged: BTreeMap<String, Option<InstanceRecord>>,
}

impl MemoryTransaction {
    async fn visible(&self, name: &str) -> Option<InstanceRecord> {
        match self.staged.get(name) {
            Some(staged) => staged.clone(),
            None => self.catalog.get(name).await,
        }
    }
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction {
    async fn exists(&mut self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.visible(name).await.is_some())
    }

    async fn fetch(&mut self, name: &str) -> Result<Option<InstanceRecord>, CatalogError> {
        Ok(self.visible(name).await)
    }

    async fn insert(&mut self, record: &InstanceRecord) -> Result<(), CatalogError> {
        if self.visible(&record.name).await.is_some() {
            return Err(CatalogError::Duplicate(record.name.clone()));
        }
        self.staged
            .insert(record.name.clone(), Some(record.clone()));
        Ok(())
    }

    async fn delete(&mut self, name: &str) -> Result<bool, CatalogError> {
        let existed = self.visible(name).await.is_some();
        self.staged.insert(name.to_string(), None);
        Ok(existed)
    }

    async fn commit(self: Box<Self>) -> Result<(), CatalogError> {
        if self.catalog.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(CatalogError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }
        let mut records = self.catalog.records.lock().await;
        for (name, staged) in self.staged {
            match staged {
                Some(record) => {
                    if records.contains_key(&name) {
                        return Err(CatalogError::Duplicate(name));
                    }
                    records.insert(name, record);
                }
                None => {
                    records.remove(&name);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), CatalogError> {
        Ok(())
    }
}
