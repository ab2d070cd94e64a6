// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle.
//!
//! An [`Instance`] is a named database provisioned on the shared cluster and
//! tracked by one catalog record. [`InstanceRegistry`] drives the lifecycle:
//!
//! ```text
//! Instance::new ──► Pending ──create_database + insert + commit──► Running
//!                      │                                              │
//!                      └── cluster or catalog failure: no record      └── delete: drop + remove record
//! ```
//!
//! The catalog transaction and the cluster DDL are not atomic together. A
//! failure after `create_database` succeeded leaves a database with no catalog
//! record, and a failure after `drop_database` leaves a record with no
//! database. Both windows are logged at `warn` and surfaced as errors; neither
//! is repaired here.
//!
//! [`InstanceState::Error`] is a valid stored value but nothing transitions an
//! instance into it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::{CatalogError, CatalogStore, InstanceRecord};
use crate::cluster::{ClusterConnector, ClusterError, ClusterManager};
use crate::config::Config;
use crate::credentials::UserCredentials;
use crate::error::{Error, Result};
use crate::naming::Identifier;

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Constructed in memory, not yet provisioned. Never persisted.
    Pending,
    /// Database and group role exist and the record is committed.
    Running,
    /// Reserved for failed instances.
    Error,
}

impl InstanceState {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown instance state '{}'", other)),
        }
    }
}

/// A logical database on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    name: Identifier,
    state: InstanceState,
    shared: bool,
}

impl Instance {
    /// Pending shared instance with the canonical form of `name`.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_topology(name, true)
    }

    /// Pending instance with the canonical form of `name` and the given
    /// topology.
    pub fn with_topology(name: &str, shared: bool) -> Result<Self> {
        let name = Identifier::canonical(name).map_err(|e| Error::InvalidInstanceName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name,
            state: InstanceState::Pending,
            shared,
        })
    }

    /// Canonical name.
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Whether the instance lives on the shared cluster.
    pub fn shared(&self) -> bool {
        self.shared
    }

    /// Whether the instance is provisioned.
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    fn from_record(record: InstanceRecord) -> Result<Self> {
        let name = Identifier::parse(&record.name).map_err(|e| Error::InvalidInstanceName {
            name: record.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name,
            state: record.state,
            shared: record.shared,
        })
    }

    fn to_record(&self) -> InstanceRecord {
        InstanceRecord {
            name: self.name.to_string(),
            state: self.state,
            shared: self.shared,
        }
    }
}

/// Cluster manager responsible for `instance`.
///
/// Shared instances resolve to `shared`. Dedicated clusters are not
/// supported and fail with [`Error::UnsupportedTopology`].
pub fn resolve_cluster_manager(
    instance: &Instance,
    shared: &Arc<ClusterManager>,
) -> Result<Arc<ClusterManager>> {
    if instance.shared {
        Ok(Arc::clone(shared))
    } else {
        Err(Error::UnsupportedTopology {
            name: instance.name.to_string(),
        })
    }
}

/// Creates, finds and deletes instances.
pub struct InstanceRegistry {
    catalog: Arc<dyn CatalogStore>,
    shared_cluster: Arc<ClusterManager>,
    reserved_names: Vec<String>,
}

impl InstanceRegistry {
    /// Registry on `catalog` with a PostgreSQL shared cluster from `config`.
    pub fn new(config: &Config, catalog: Arc<dyn CatalogStore>) -> Self {
        Self::from_parts(
            catalog,
            Arc::new(ClusterManager::from_config(config)),
            config.reserved_names.clone(),
        )
    }

    /// Registry on `catalog` reaching the shared cluster through `connector`.
    pub fn with_connector(
        config: &Config,
        catalog: Arc<dyn CatalogStore>,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self::from_parts(
            catalog,
            Arc::new(ClusterManager::with_connector(config, connector)),
            config.reserved_names.clone(),
        )
    }

    /// Registry from already-built parts.
    pub fn from_parts(
        catalog: Arc<dyn CatalogStore>,
        shared_cluster: Arc<ClusterManager>,
        reserved_names: Vec<String>,
    ) -> Self {
        Self {
            catalog,
            shared_cluster,
            reserved_names,
        }
    }

    /// Manager of the shared cluster.
    pub fn cluster_manager(&self) -> &Arc<ClusterManager> {
        &self.shared_cluster
    }

    fn lookup_name(name: &str) -> Result<Identifier> {
        Identifier::canonical(name).map_err(|e| Error::InvalidInstanceName {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Provision a shared instance for `name`.
    pub async fn create(&self, name: &str) -> Result<Instance> {
        self.provision(Instance::new(name)?, None).await
    }

    /// Provision a shared instance for `name` with a database encoding.
    pub async fn create_with_encoding(&self, name: &str, encoding: &str) -> Result<Instance> {
        self.provision(Instance::new(name)?, Some(encoding)).await
    }

    /// Provision `instance`: create its database and group role, then commit
    /// its record as running.
    ///
    /// A cluster-reported "already exists" is returned as
    /// [`Error::InstanceAlreadyExists`]. Any other cluster failure is
    /// [`Error::DatabaseCreation`], or [`Error::Timeout`] when the operation
    /// ran out of time. No record is written on failure.
    #[instrument(skip(self, instance), fields(instance = %instance.name))]
    pub async fn provision(
        &self,
        mut instance: Instance,
        encoding: Option<&str>,
    ) -> Result<Instance> {
        let name = instance.name.to_string();

        // The server folds unquoted names, so `Template1` is `template1`.
        if self
            .reserved_names
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(&name))
        {
            return Err(Error::InvalidInstanceName {
                name,
                reason: "name is reserved".to_string(),
            });
        }

        let cluster = resolve_cluster_manager(&instance, &self.shared_cluster)?;

        let mut tx = self
            .catalog
            .begin()
            .await
            .map_err(|e| Error::catalog(&name, e))?;

        if tx.exists(&name).await.map_err(|e| Error::catalog(&name, e))? {
            return Err(Error::InstanceAlreadyExists { name });
        }

        match cluster.create_database(&instance.name, encoding).await {
            Ok(()) => {}
            Err(ClusterError::AlreadyExists(_)) => {
                return Err(Error::InstanceAlreadyExists { name });
            }
            Err(ClusterError::Timeout { operation, timeout }) => {
                return Err(Error::Timeout {
                    name,
                    operation,
                    timeout,
                });
            }
            Err(source) => return Err(Error::DatabaseCreation { name, source }),
        }

        instance.state = InstanceState::Running;

        if let Err(e) = tx.insert(&instance.to_record()).await {
            warn!(instance = %name, error = %e, "Database created but catalog insert failed; database is orphaned");
            return Err(catalog_write_error(name, e));
        }

        if let Err(e) = tx.commit().await {
            warn!(instance = %name, error = %e, "Database created but catalog commit failed; database is orphaned");
            return Err(catalog_write_error(name, e));
        }

        info!(instance = %name, "Instance created");
        Ok(instance)
    }

    /// Load the instance named `name`.
    ///
    /// `name` is canonicalized first, so the caller-facing name and the
    /// canonical name find the same instance.
    pub async fn retrieve(&self, name: &str) -> Result<Instance> {
        let canonical = Self::lookup_name(name)?;
        let name = canonical.as_str();

        let mut tx = self
            .catalog
            .begin()
            .await
            .map_err(|e| Error::catalog(name, e))?;
        let record = tx.fetch(name).await.map_err(|e| Error::catalog(name, e))?;
        tx.rollback().await.map_err(|e| Error::catalog(name, e))?;

        match record {
            Some(record) => Instance::from_record(record),
            None => Err(Error::InstanceNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Drop the instance's database and group role, then remove its record.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let instance = self.retrieve(name).await?;
        let name = instance.name.as_str();
        let cluster = resolve_cluster_manager(&instance, &self.shared_cluster)?;

        let mut tx = self
            .catalog
            .begin()
            .await
            .map_err(|e| Error::catalog(name, e))?;

        cluster
            .drop_database(&instance.name)
            .await
            .map_err(|e| Error::cluster(name, e))?;

        if let Err(e) = tx.delete(name).await {
            warn!(instance = %name, error = %e, "Database dropped but catalog delete failed; record is stale");
            return Err(Error::catalog(name, e));
        }

        if let Err(e) = tx.commit().await {
            warn!(instance = %name, error = %e, "Database dropped but catalog commit failed; record is stale");
            return Err(Error::catalog(name, e));
        }

        info!(instance = %name, "Instance deleted");
        Ok(())
    }

    /// Create the login role for `host` on `instance`.
    pub async fn create_user(&self, instance: &Instance, host: &str) -> Result<UserCredentials> {
        let name = instance.name.as_str();
        resolve_cluster_manager(instance, &self.shared_cluster)?
            .create_user(&instance.name, host)
            .await
            .map_err(|e| Error::cluster(name, e))
    }

    /// Drop the login role for `host` on `instance`.
    pub async fn drop_user(&self, instance: &Instance, host: &str) -> Result<()> {
        let name = instance.name.as_str();
        resolve_cluster_manager(instance, &self.shared_cluster)?
            .drop_user(&instance.name, host)
            .await
            .map_err(|e| Error::cluster(name, e))
    }

    /// Whether `instance` is running and its database answers.
    pub async fn is_up(&self, instance: &Instance) -> Result<bool> {
        if !instance.is_running() {
            return Ok(false);
        }
        let cluster = resolve_cluster_manager(instance, &self.shared_cluster)?;
        Ok(cluster.is_up(&instance.name).await)
    }

    /// Host external callers use to reach `instance`.
    pub fn public_host(&self, instance: &Instance) -> Result<String> {
        let cluster = resolve_cluster_manager(instance, &self.shared_cluster)?;
        Ok(cluster.public_host().to_string())
    }

    /// Port external callers use to reach `instance`.
    pub fn port(&self, instance: &Instance) -> Result<u16> {
        let cluster = resolve_cluster_manager(instance, &self.shared_cluster)?;
        Ok(cluster.port())
    }
}

fn catalog_write_error(name: String, source: CatalogError) -> Error {
    match source {
        CatalogError::Duplicate(_) => Error::InstanceAlreadyExists { name },
        source => Error::Catalog { name, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use crate::config::SharedClusterConfig;
    use crate::credentials::CredentialDeriver;
    use std::time::Duration;

    fn shared_manager() -> Arc<ClusterManager> {
        Arc::new(ClusterManager::new(
            &SharedClusterConfig::default(),
            Arc::new(MockCluster::new()),
            CredentialDeriver::new(b"salt"),
            Duration::from_secs(5),
            4,
        ))
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            InstanceState::Pending,
            InstanceState::Running,
            InstanceState::Error,
        ] {
            assert_eq!(state.as_str().parse::<InstanceState>(), Ok(state));
            assert_eq!(state.to_string(), state.as_str());
        }
        assert!("stopped".parse::<InstanceState>().is_err());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&InstanceState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn test_new_instance_is_pending_shared_and_canonical() {
        let instance = Instance::new("my db!").unwrap();
        assert_eq!(instance.name().as_str(), "my_db_5036b48b44");
        assert_eq!(instance.state(), InstanceState::Pending);
        assert!(instance.shared());
        assert!(!instance.is_running());
    }

    #[test]
    fn test_empty_name_is_invalid() {
        let err = Instance::new("").unwrap_err();
        assert!(matches!(err, Error::InvalidInstanceName { .. }));
    }

    #[test]
    fn test_resolve_cluster_manager() {
        let shared = shared_manager();

        let instance = Instance::new("foo").unwrap();
        let resolved = resolve_cluster_manager(&instance, &shared).unwrap();
        assert!(Arc::ptr_eq(&resolved, &shared));

        let dedicated = Instance::with_topology("foo", false).unwrap();
        let err = resolve_cluster_manager(&dedicated, &shared).err().unwrap();
        assert!(matches!(err, Error::UnsupportedTopology { name } if name == "foo"));
    }

    #[test]
    fn test_record_conversion() {
        let mut instance = Instance::new("foo").unwrap();
        instance.state = InstanceState::Running;

        let record = instance.to_record();
        assert_eq!(record.name, "foo");
        assert_eq!(record.state, InstanceState::Running);
        assert!(record.shared);
        assert_eq!(Instance::from_record(record).unwrap(), instance);
    }

    #[test]
    fn test_duplicate_write_is_already_exists() {
        let err = catalog_write_error("foo".to_string(), CatalogError::Duplicate("foo".into()));
        assert!(matches!(err, Error::InstanceAlreadyExists { .. }));

        let err = catalog_write_error("foo".to_string(), CatalogError::Unavailable("x".into()));
        assert!(matches!(err, Error::Catalog { .. }));
    }
}
