// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster management.
//!
//! [`ClusterManager`] issues the administrative statements that create and
//! drop instance databases, their owning group roles and their login roles on
//! one shared cluster. Every statement commits on its own; there is no
//! rollback across the statements of one operation.

pub mod mock;
pub mod postgres;
pub mod traits;

pub use mock::MockCluster;
pub use postgres::PgClusterConnector;
pub use traits::{ClusterConnection, ClusterConnector, ClusterError, Statement};

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, SharedClusterConfig};
use crate::credentials::{CredentialDeriver, UserCredentials};
use crate::naming::Identifier;

/// Database the manager connects to for cluster-wide DDL.
pub const ADMIN_DATABASE: &str = "postgres";

/// Bounded map from database name to an open connection handle.
struct ConnectionCache {
    capacity: usize,
    handles: HashMap<String, Arc<dyn ClusterConnection>>,
    order: VecDeque<String>,
}

impl ConnectionCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            handles: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, database: &str) -> Option<Arc<dyn ClusterConnection>> {
        self.handles.get(database).cloned()
    }

    /// Insert a handle, returning the evicted entry if the cache was full.
    fn insert(
        &mut self,
        database: &str,
        handle: Arc<dyn ClusterConnection>,
    ) -> Option<(String, Arc<dyn ClusterConnection>)> {
        let mut evicted = None;
        if self.handles.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            evicted = self
                .handles
                .remove(&oldest)
                .map(|handle| (oldest, handle));
        }
        self.order.push_back(database.to_string());
        self.handles.insert(database.to_string(), handle);
        evicted
    }

    fn remove(&mut self, database: &str) -> Option<Arc<dyn ClusterConnection>> {
        self.order.retain(|name| name != database);
        self.handles.remove(database)
    }

    fn len(&self) -> usize {
        self.handles.len()
    }
}

/// Administrative access to one shared cluster.
///
/// Connection handles are cached per database name for the manager's
/// lifetime and opened lazily on first use. The cache sits behind an async
/// mutex, so one manager can be shared across tasks.
pub struct ClusterManager {
    host: String,
    port: u16,
    public_host: Option<String>,
    connector: Arc<dyn ClusterConnector>,
    credentials: CredentialDeriver,
    timeout: Duration,
    cache: Mutex<ConnectionCache>,
}

impl ClusterManager {
    /// Create a manager for the cluster described by `shared`.
    pub fn new(
        shared: &SharedClusterConfig,
        connector: Arc<dyn ClusterConnector>,
        credentials: CredentialDeriver,
        timeout: Duration,
        max_cached_connections: usize,
    ) -> Self {
        Self {
            host: shared.host.clone(),
            port: shared.port,
            public_host: shared.public_host.clone(),
            connector,
            credentials,
            timeout,
            cache: Mutex::new(ConnectionCache::new(max_cached_connections)),
        }
    }

    /// Manager for the shared cluster in `config`, talking to PostgreSQL.
    pub fn from_config(config: &Config) -> Self {
        Self::with_connector(config, Arc::new(PgClusterConnector::new(&config.shared)))
    }

    /// Manager for the shared cluster in `config` using `connector`.
    pub fn with_connector(config: &Config, connector: Arc<dyn ClusterConnector>) -> Self {
        Self::new(
            &config.shared,
            connector,
            CredentialDeriver::new(config.salt.as_bytes()),
            config.operation_timeout,
            config.max_cached_connections,
        )
    }

    /// Host the manager connects to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the manager connects to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host advertised to external callers: the public override if set,
    /// otherwise the connection host.
    pub fn public_host(&self) -> &str {
        self.public_host.as_deref().unwrap_or(&self.host)
    }

    /// Credential deriver used for group and login roles.
    pub fn credentials(&self) -> &CredentialDeriver {
        &self.credentials
    }

    /// Number of cached connection handles.
    pub async fn cached_connections(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Cached handle for `database`, opening one on a miss.
    ///
    /// Names are unquoted in DDL, so the server stores them lowercased. The
    /// handle is opened on, and cached under, that folded name.
    async fn connection(&self, database: &str) -> Result<Arc<dyn ClusterConnection>, ClusterError> {
        let database = database.to_ascii_lowercase();
        let (handle, evicted) = {
            let mut cache = self.cache.lock().await;
            if let Some(handle) = cache.get(&database) {
                return Ok(handle);
            }
            debug!(
                connector = self.connector.connector_type(),
                database = %database,
                "Caching new cluster handle"
            );
            let handle = self.connector.connect(&database).await?;
            let evicted = cache.insert(&database, handle.clone());
            (handle, evicted)
        };
        if let Some((name, evicted)) = evicted {
            Self::release(&name, evicted).await;
        }
        Ok(handle)
    }

    /// Remove the cached handle for `database`, if any, and release it.
    async fn invalidate(&self, database: &str) {
        let database = database.to_ascii_lowercase();
        let removed = self.cache.lock().await.remove(&database);
        if let Some(handle) = removed {
            Self::release(&database, handle).await;
        }
    }

    /// Close a handle that left the cache, unless an operation still holds it.
    ///
    /// A handle in use is only dropped here; its sessions end when the last
    /// holder drops it.
    async fn release(database: &str, handle: Arc<dyn ClusterConnection>) {
        if Arc::strong_count(&handle) == 1 {
            debug!(database, "Closing cluster handle");
            handle.close().await;
        } else {
            debug!(database, "Releasing cluster handle still in use");
        }
    }

    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }

    async fn execute_on(
        &self,
        connection: &dyn ClusterConnection,
        database: &str,
        statement: Statement,
    ) -> Result<(), ClusterError> {
        debug!(database, sql = %statement, "Executing cluster statement");
        connection.execute(&statement).await
    }

    fn group_of(&self, name: &Identifier) -> Result<Identifier, ClusterError> {
        Ok(Identifier::parse(
            &self.credentials.derive_group(name.as_str()),
        )?)
    }

    /// Create database `name` owned by its group role.
    ///
    /// Issues, each auto-committed and in order: `CREATE ROLE <group> WITH
    /// NOLOGIN`, `CREATE DATABASE <name> [ENCODING <encoding>]`, `ALTER
    /// DATABASE <name> OWNER TO <group>`. A failure after the first statement
    /// leaves what was already created in place.
    pub async fn create_database(
        &self,
        name: &Identifier,
        encoding: Option<&str>,
    ) -> Result<(), ClusterError> {
        let group = self.group_of(name)?;
        self.run("create_database", async {
            let admin = self.connection(ADMIN_DATABASE).await?;

            self.execute_on(
                admin.as_ref(),
                ADMIN_DATABASE,
                Statement::new(format!("CREATE ROLE {} WITH NOLOGIN", group)),
            )
            .await?;

            let create = match encoding {
                Some(encoding) => {
                    Statement::new(format!("CREATE DATABASE {} ENCODING $1", name)).bind(encoding)
                }
                None => Statement::new(format!("CREATE DATABASE {}", name)),
            };
            if let Err(e) = self.execute_on(admin.as_ref(), ADMIN_DATABASE, create).await {
                warn!(database = %name, group = %group, error = %e, "Group role left behind after failed CREATE DATABASE");
                return Err(e);
            }

            if let Err(e) = self
                .execute_on(
                    admin.as_ref(),
                    ADMIN_DATABASE,
                    Statement::new(format!("ALTER DATABASE {} OWNER TO {}", name, group)),
                )
                .await
            {
                warn!(database = %name, group = %group, error = %e, "Database and group role left behind after failed ownership transfer");
                return Err(e);
            }

            info!(database = %name, group = %group, "Database created");
            Ok(())
        })
        .await
    }

    /// Drop database `name`, then its group role.
    ///
    /// The cached handle on `name` is closed first so it does not hold the
    /// database open.
    pub async fn drop_database(&self, name: &Identifier) -> Result<(), ClusterError> {
        let group = self.group_of(name)?;
        self.invalidate(name.as_str()).await;
        self.run("drop_database", async {
            let admin = self.connection(ADMIN_DATABASE).await?;

            self.execute_on(
                admin.as_ref(),
                ADMIN_DATABASE,
                Statement::new(format!("DROP DATABASE {}", name)),
            )
            .await?;

            if let Err(e) = self
                .execute_on(
                    admin.as_ref(),
                    ADMIN_DATABASE,
                    Statement::new(format!("DROP ROLE {}", group)),
                )
                .await
            {
                warn!(database = %name, group = %group, error = %e, "Group role left behind after database was dropped");
                return Err(e);
            }

            info!(database = %name, group = %group, "Database dropped");
            Ok(())
        })
        .await
    }

    /// Create the login role for `(database, host)` inside the database's
    /// group role and return its credentials.
    ///
    /// The returned username is the folded role name the server stores, which
    /// is what a client must log in with.
    pub async fn create_user(
        &self,
        database: &Identifier,
        host: &str,
    ) -> Result<UserCredentials, ClusterError> {
        let credentials = self.credentials.derive(database.as_str(), host);
        let username = Identifier::parse(&credentials.username)?;
        let group = Identifier::parse(&credentials.group)?;
        self.run("create_user", async {
            let connection = self.connection(database.as_str()).await?;
            let statement = Statement::new(format!(
                "CREATE ROLE {} WITH LOGIN PASSWORD $1 IN ROLE {}",
                username, group
            ))
            .bind(credentials.password.clone());
            self.execute_on(connection.as_ref(), database.as_str(), statement)
                .await?;
            info!(database = %database, username = %username, "Login role created");
            Ok(())
        })
        .await?;

        Ok(UserCredentials {
            username: credentials.username.to_ascii_lowercase(),
            password: credentials.password,
        })
    }

    /// Drop the login role for `(database, host)`.
    pub async fn drop_user(&self, database: &Identifier, host: &str) -> Result<(), ClusterError> {
        let username =
            Identifier::parse(&self.credentials.derive_username(database.as_str(), host))?;
        self.run("drop_user", async {
            let connection = self.connection(database.as_str()).await?;
            self.execute_on(
                connection.as_ref(),
                database.as_str(),
                Statement::new(format!("DROP ROLE {}", username)),
            )
            .await?;
            info!(database = %database, username = %username, "Login role dropped");
            Ok(())
        })
        .await
    }

    /// Whether `database` answers a trivial query.
    ///
    /// Connection failures, query failures and timeouts all count as down.
    pub async fn is_up(&self, database: &Identifier) -> bool {
        let result = self
            .run("is_up", async {
                let connection = self.connection(database.as_str()).await?;
                connection.ping().await
            })
            .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(database = %database, error = %e, "Database is not reachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedClusterConfig {
        SharedClusterConfig {
            host: "db.internal".to_string(),
            port: 5433,
            admin_user: "postgres".to_string(),
            admin_password: "admin".to_string(),
            public_host: None,
        }
    }

    fn manager(cluster: &MockCluster, capacity: usize) -> ClusterManager {
        ClusterManager::new(
            &shared(),
            Arc::new(cluster.clone()),
            CredentialDeriver::new(b"salt"),
            Duration::from_secs(5),
            capacity,
        )
    }

    fn id(name: &str) -> Identifier {
        Identifier::parse(name).unwrap()
    }

    #[test]
    fn test_public_host_falls_back_to_host() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        assert_eq!(m.public_host(), "db.internal");
        assert_eq!(m.port(), 5433);

        let mut with_public = shared();
        with_public.public_host = Some("db.example.com".to_string());
        let m = ClusterManager::new(
            &with_public,
            Arc::new(cluster),
            CredentialDeriver::new(b"salt"),
            Duration::from_secs(5),
            4,
        );
        assert_eq!(m.public_host(), "db.example.com");
        assert_eq!(m.host(), "db.internal");
    }

    #[tokio::test]
    async fn test_create_database_statement_order() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);

        m.create_database(&id("a_very_long_instance_name"), None)
            .await
            .unwrap();

        let executed: Vec<String> = cluster.executed().await.into_iter().map(|(_, s)| s).collect();
        assert_eq!(
            executed,
            vec![
                "CREATE ROLE a_very_lon_group WITH NOLOGIN",
                "CREATE DATABASE a_very_long_instance_name",
                "ALTER DATABASE a_very_long_instance_name OWNER TO a_very_lon_group",
            ]
        );
        assert_eq!(
            cluster.database_owner("a_very_long_instance_name").await.as_deref(),
            Some("a_very_lon_group")
        );
    }

    #[tokio::test]
    async fn test_create_database_with_encoding_binds_literal() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);

        m.create_database(&id("foo"), Some("UTF8")).await.unwrap();

        let executed = cluster.executed().await;
        assert_eq!(executed[1].1, "CREATE DATABASE foo ENCODING $1");
    }

    #[tokio::test]
    async fn test_create_database_failure_leaves_group_role() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        cluster
            .fail_on(
                "CREATE DATABASE",
                ClusterError::Statement("disk full".to_string()),
            )
            .await;

        let err = m.create_database(&id("foo"), None).await.unwrap_err();
        assert!(matches!(err, ClusterError::Statement(_)));
        assert!(cluster.has_role("foo").await);
        assert!(!cluster.has_database("foo").await);
    }

    #[tokio::test]
    async fn test_drop_database_drops_database_then_role() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        m.create_database(&id("foo"), None).await.unwrap();

        m.drop_database(&id("foo")).await.unwrap();

        assert!(!cluster.has_database("foo").await);
        assert!(!cluster.has_role("foo").await);
        let executed: Vec<String> = cluster.executed().await.into_iter().map(|(_, s)| s).collect();
        assert_eq!(&executed[3..], &["DROP DATABASE foo", "DROP ROLE foo"]);
    }

    #[tokio::test]
    async fn test_drop_database_closes_cached_handle() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        m.create_database(&id("foo"), None).await.unwrap();
        assert!(m.is_up(&id("foo")).await);
        assert_eq!(m.cached_connections().await, 2);

        m.drop_database(&id("foo")).await.unwrap();

        assert_eq!(m.cached_connections().await, 1);
        assert_eq!(cluster.closes(), 1);
    }

    #[tokio::test]
    async fn test_create_user_passes_password_as_parameter() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        m.create_database(&id("foo"), None).await.unwrap();

        let creds = m.create_user(&id("foo"), "10.1.2.3").await.unwrap();

        let expected = m.credentials().derive("foo", "10.1.2.3");
        assert_eq!(creds.username, expected.username);
        assert_eq!(creds.password, expected.password);
        assert_eq!(
            cluster.login_password(&creds.username).await,
            Some(creds.password.clone())
        );
        assert_eq!(cluster.membership(&creds.username).await.as_deref(), Some("foo"));

        let (database, sql) = cluster.executed().await.pop().unwrap();
        assert_eq!(database, "foo");
        assert!(!sql.contains(&creds.password));
    }

    #[tokio::test]
    async fn test_drop_user_removes_login_role() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        m.create_database(&id("foo"), None).await.unwrap();
        let creds = m.create_user(&id("foo"), "10.1.2.3").await.unwrap();

        m.drop_user(&id("foo"), "10.1.2.3").await.unwrap();

        assert!(!cluster.has_role(&creds.username).await);
        assert!(cluster.has_role("foo").await);
    }

    #[tokio::test]
    async fn test_connections_are_cached_per_database() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        m.create_database(&id("foo"), None).await.unwrap();
        m.create_database(&id("bar"), None).await.unwrap();
        assert_eq!(cluster.connects(), 1);

        assert!(m.is_up(&id("foo")).await);
        assert!(m.is_up(&id("foo")).await);
        assert_eq!(cluster.connects(), 2);
        assert_eq!(m.cached_connections().await, 2);
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest_when_full() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 2);
        for name in ["a", "b", "c"] {
            cluster.seed_database(name).await;
        }

        assert!(m.is_up(&id("a")).await);
        assert!(m.is_up(&id("b")).await);
        assert!(m.is_up(&id("c")).await);

        assert_eq!(m.cached_connections().await, 2);
        assert_eq!(cluster.closes(), 1);
    }

    #[tokio::test]
    async fn test_mixed_case_name_uses_folded_handle() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        m.create_database(&id("OrdersDb"), None).await.unwrap();
        assert!(cluster.has_database("ordersdb").await);

        assert!(m.is_up(&id("OrdersDb")).await);
        assert!(m.is_up(&id("ordersdb")).await);
        assert_eq!(cluster.connects(), 2);
        assert_eq!(m.cached_connections().await, 2);

        let creds = m.create_user(&id("OrdersDb"), "10.1.2.3").await.unwrap();
        assert_eq!(creds.username, creds.username.to_ascii_lowercase());
        assert!(cluster.has_role(&creds.username).await);
        assert_eq!(
            cluster.membership(&creds.username).await.as_deref(),
            Some("ordersdb")
        );
        m.drop_user(&id("OrdersDb"), "10.1.2.3").await.unwrap();

        m.drop_database(&id("OrdersDb")).await.unwrap();
        assert_eq!(m.cached_connections().await, 1);
        assert_eq!(cluster.closes(), 1);
        assert!(!cluster.has_database("ordersdb").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_keeps_handle_in_use_open() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 1);
        m.create_database(&id("foo"), None).await.unwrap();
        cluster.seed_database("bar").await;
        cluster.set_latency(Some(Duration::from_secs(1))).await;

        // create_user holds the "foo" handle while is_up("bar") evicts it.
        let (foo, bar) = (id("foo"), id("bar"));
        let (created, up) = tokio::join!(m.create_user(&foo, "10.1.2.3"), m.is_up(&bar));

        assert!(created.is_ok(), "got {created:?}");
        assert!(up);
        // Only the idle admin handle was closed.
        assert_eq!(cluster.closes(), 1);
        assert_eq!(m.cached_connections().await, 1);
    }

    #[tokio::test]
    async fn test_is_up_false_when_unreachable_or_missing() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        assert!(!m.is_up(&id("missing")).await);

        cluster.seed_database("foo").await;
        assert!(m.is_up(&id("foo")).await);
        cluster.set_unreachable(true);
        assert!(!m.is_up(&id("foo")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_time_out() {
        let cluster = MockCluster::new();
        let m = manager(&cluster, 4);
        cluster.set_latency(Some(Duration::from_secs(60))).await;

        let err = m.create_database(&id("foo"), None).await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::Timeout {
                operation: "create_database",
                ..
            }
        ));
        assert!(!m.is_up(&id("foo")).await);
    }
}
