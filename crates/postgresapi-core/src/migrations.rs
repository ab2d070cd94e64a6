// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for the catalog store.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::PgPool;
//! use postgresapi_core::migrations;
//!
//! let pool = PgPool::connect(&database_url).await?;
//! migrations::run(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with the catalog schema embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Run catalog migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_table_migration_is_embedded() {
        let migration = POSTGRES
            .iter()
            .find(|m| m.version == 20250101000000)
            .expect("instance migration");
        assert!(migration.sql.contains("CREATE TABLE IF NOT EXISTS instance"));
    }
}
