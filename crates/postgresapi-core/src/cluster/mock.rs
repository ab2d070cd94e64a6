// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock cluster for testing.
//!
//! Interprets the handful of DDL statements the cluster manager issues
//! against an in-memory set of databases and roles, without a real server.
//! Failures can be injected per statement to exercise partial-failure paths.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

/// Database every cluster has.
const MAINTENANCE_DATABASE: &str = "postgres";

#[derive(Debug, Default)]
struct MockClusterState {
    databases: HashSet<String>,
    owners: HashMap<String, String>,
    roles: HashSet<String>,
    login_passwords: HashMap<String, String>,
    memberships: HashMap<String, String>,
    executed: Vec<(String, String)>,
    failures: Vec<(String, ClusterError)>,
}

/// Mock cluster for testing.
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockClusterState>>,
    unreachable: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<Duration>>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockCluster {
    /// Create an empty, reachable cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next statement whose SQL starts with `prefix` fail with `error`.
    ///
    /// Each injected failure fires once.
    pub async fn fail_on(&self, prefix: &str, error: ClusterError) {
        self.state
            .lock()
            .await
            .failures
            .push((prefix.to_string(), error));
    }

    /// Toggle whether pings and statements reach the server.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every statement and ping by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().await = latency;
    }

    /// Add a database directly, bypassing DDL (simulates residue).
    pub async fn seed_database(&self, name: &str) {
        self.state.lock().await.databases.insert(name.to_string());
    }

    /// Add a role directly, bypassing DDL (simulates residue).
    pub async fn seed_role(&self, name: &str) {
        self.state.lock().await.roles.insert(name.to_string());
    }

    /// Whether `name` exists as a database.
    pub async fn has_database(&self, name: &str) -> bool {
        self.state.lock().await.databases.contains(name)
    }

    /// Whether `name` exists as a role.
    pub async fn has_role(&self, name: &str) -> bool {
        self.state.lock().await.roles.contains(name)
    }

    /// Owner of database `name`, if it was reassigned.
    pub async fn database_owner(&self, name: &str) -> Option<String> {
        self.state.lock().await.owners.get(name).cloned()
    }

    /// Password a login role was created with.
    pub async fn login_password(&self, role: &str) -> Option<String> {
        self.state.lock().await.login_passwords.get(role).cloned()
    }

    /// Parent role a login role was created in.
    pub async fn membership(&self, role: &str) -> Option<String> {
        self.state.lock().await.memberships.get(role).cloned()
    }

    /// `(database, sql template)` of every statement that succeeded, in order.
    pub async fn executed(&self) -> Vec<(String, String)> {
        self.state.lock().await.executed.clone()
    }

    /// Number of connections opened so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of connections closed so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ClusterError::Connection(
                "mock cluster is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterConnector for MockCluster {
    fn connector_type(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, database: &str) -> Result<Arc<dyn ClusterConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            cluster: self.clone(),
            database: database.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Fold an unquoted identifier the way the server does.
fn fold(identifier: &str) -> String {
    identifier.to_ascii_lowercase()
}

/// Connection handle on one mock database.
///
/// The database name is matched exactly, the way a connection string is. A
/// closed handle refuses further work.
pub struct MockConnection {
    cluster: MockCluster,
    database: String,
    closed: AtomicBool,
}

impl MockConnection {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClusterError::Connection(format!(
                "connection to \"{}\" is closed",
                self.database
            )));
        }
        Ok(())
    }

    fn apply(state: &mut MockClusterState, statement: &Statement) -> Result<()> {
        let tokens: Vec<&str> = statement.sql().split_whitespace().collect();
        match tokens.as_slice() {
            ["CREATE", "ROLE", role, "WITH", "NOLOGIN"] => {
                let role = fold(role);
                if !state.roles.insert(role.clone()) {
                    return Err(ClusterError::AlreadyExists(format!(
                        "role \"{}\" already exists",
                        role
                    )));
                }
            }
            ["CREATE", "ROLE", role, "WITH", "LOGIN", "PASSWORD", "$1", "IN", "ROLE", group] => {
                let (role, group) = (fold(role), fold(group));
                if !state.roles.contains(&group) {
                    return Err(ClusterError::DoesNotExist(format!(
                        "role \"{}\" does not exist",
                        group
                    )));
                }
                if !state.roles.insert(role.clone()) {
                    return Err(ClusterError::AlreadyExists(format!(
                        "role \"{}\" already exists",
                        role
                    )));
                }
                let password = statement.params().first().cloned().unwrap_or_default();
                state.login_passwords.insert(role.clone(), password);
                state.memberships.insert(role, group);
            }
            ["CREATE", "DATABASE", name, ..] => {
                let name = fold(name);
                if !state.databases.insert(name.clone()) {
                    return Err(ClusterError::AlreadyExists(format!(
                        "database \"{}\" already exists",
                        name
                    )));
                }
            }
            ["ALTER", "DATABASE", name, "OWNER", "TO", owner] => {
                let (name, owner) = (fold(name), fold(owner));
                if !state.databases.contains(&name) {
                    return Err(ClusterError::DoesNotExist(format!(
                        "database \"{}\" does not exist",
                        name
                    )));
                }
                if !state.roles.contains(&owner) {
                    return Err(ClusterError::DoesNotExist(format!(
                        "role \"{}\" does not exist",
                        owner
                    )));
                }
                state.owners.insert(name, owner);
            }
            ["DROP", "DATABASE", name] => {
                let name = fold(name);
                if !state.databases.remove(&name) {
                    return Err(ClusterError::DoesNotExist(format!(
                        "database \"{}\" does not exist",
                        name
                    )));
                }
                state.owners.remove(&name);
            }
            ["DROP", "ROLE", role] => {
                let role = fold(role);
                if state.owners.values().any(|owner| owner == &role) {
                    return Err(ClusterError::InUse(format!(
                        "role \"{}\" cannot be dropped because some objects depend on it",
                        role
                    )));
                }
                if !state.roles.remove(&role) {
                    return Err(ClusterError::DoesNotExist(format!(
                        "role \"{}\" does not exist",
                        role
                    )));
                }
                state.login_passwords.remove(&role);
                state.memberships.remove(&role);
            }
            _ => {
                return Err(ClusterError::Statement(format!(
                    "mock cluster does not understand: {}",
                    statement
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterConnection for MockConnection {
    async fn execute(&self, statement: &Statement) -> Result<()> {
        self.cluster.simulate_latency().await;
        self.cluster.check_reachable()?;
        self.check_open()?;

        let mut state = self.cluster.state.lock().await;
        if let Some(pos) = state
            .failures
            .iter()
            .position(|(prefix, _)| statement.sql().starts_with(prefix.as_str()))
        {
            let (_, error) = state.failures.remove(pos);
            return Err(error);
        }

        Self::apply(&mut state, statement)?;
        state
            .executed
            .push((self.database.clone(), statement.sql().to_string()));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.cluster.simulate_latency().await;
        self.cluster.check_reachable()?;
        self.check_open()?;
        let state = self.cluster.state.lock().await;
        if self.database != MAINTENANCE_DATABASE && !state.databases.contains(&self.database) {
            return Err(ClusterError::DoesNotExist(format!(
                "database \"{}\" does not exist",
                self.database
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cluster.closes.fetch_add(1, Ordering::SeqCst);
    }
}
