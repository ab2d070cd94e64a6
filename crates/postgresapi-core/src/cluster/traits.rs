// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster connection trait definitions.
//!
//! Defines the abstract, non-transactional SQL execution capability used for
//! administrative DDL against a shared cluster.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::naming::IdentifierError;

/// Errors from cluster operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The database or role already exists on the cluster.
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    /// The database or role does not exist on the cluster.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// The object is still in use (open sessions or dependent objects).
    #[error("Object is in use: {0}")]
    InUse(String),

    /// The cluster rejected a statement for another reason.
    #[error("Statement failed: {0}")]
    Statement(String),

    /// The cluster could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The operation did not finish within the configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Name of the cluster operation.
        operation: &'static str,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A derived role name was not a valid identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// One auto-committed SQL statement.
///
/// Identifiers are already part of the SQL text (they come from
/// [`Identifier`](crate::naming::Identifier) values). Literal values are kept
/// apart as positional parameters `$1..$n` and are never concatenated by the
/// caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<String>,
}

impl Statement {
    /// A statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append the next positional parameter.
    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    /// SQL text with `$n` placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Positional parameters, `$1` first.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// SQL text with every `$n` replaced by its parameter as an escaped
    /// string literal.
    ///
    /// PostgreSQL does not accept bind parameters in utility statements such
    /// as `CREATE ROLE`, so drivers executing those must inline the literal.
    /// Placeholders without a matching parameter are left untouched.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut chars = self.sql.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let mut end = start + 1;
            while let Some(&(i, d)) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            let param = self.sql[start + 1..end]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| self.params.get(idx));
            match param {
                Some(value) => out.push_str(&quote_literal(value)),
                None => out.push_str(&self.sql[start..end]),
            }
        }
        out
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Quote `value` as a PostgreSQL string literal, in the manner of libpq's
/// `PQescapeLiteral`: single quotes are doubled, and a value containing
/// backslashes is written as an `E''` literal with backslashes doubled.
pub fn quote_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut quoted = String::with_capacity(value.len() + 3);
    if has_backslash {
        quoted.push('E');
    }
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// An open, auto-committing handle on one database of the cluster.
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    /// Execute one statement as its own committed unit.
    async fn execute(&self, statement: &Statement) -> Result<()>;

    /// Trivial round trip proving the database accepts queries.
    async fn ping(&self) -> Result<()>;

    /// Release the handle's server sessions.
    async fn close(&self);
}

/// Opens connections to databases on a cluster with the admin credential.
///
/// Connectors do NOT cache; caching is the cluster manager's job.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connector type identifier (e.g., "postgres", "mock").
    fn connector_type(&self) -> &'static str;

    /// Open a connection to `database`.
    async fn connect(&self, database: &str) -> Result<Arc<dyn ClusterConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_plain() {
        assert_eq!(quote_literal("abc123"), "'abc123'");
    }

    #[test]
    fn test_quote_literal_doubles_single_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_quote_literal_backslashes_use_escape_string() {
        assert_eq!(quote_literal(r"a\b"), r"E'a\\b'");
    }

    #[test]
    fn test_render_substitutes_parameters() {
        let stmt = Statement::new("CREATE ROLE u WITH LOGIN PASSWORD $1 IN ROLE g").bind("pw'1");
        assert_eq!(
            stmt.render(),
            "CREATE ROLE u WITH LOGIN PASSWORD 'pw''1' IN ROLE g"
        );
    }

    #[test]
    fn test_render_multiple_and_multi_digit_placeholders() {
        let mut stmt = Statement::new("SELECT $1, $2, $10");
        for i in 1..=10 {
            stmt = stmt.bind(format!("v{}", i));
        }
        assert_eq!(stmt.render(), "SELECT 'v1', 'v2', 'v10'");
    }

    #[test]
    fn test_render_leaves_unbound_placeholders() {
        let stmt = Statement::new("SELECT $1, $2, $").bind("x");
        assert_eq!(stmt.render(), "SELECT 'x', $2, $");
    }

    #[test]
    fn test_debug_and_display_hide_parameters() {
        let stmt = Statement::new("CREATE ROLE u WITH LOGIN PASSWORD $1").bind("secret");
        assert!(!format!("{:?}", stmt).contains("secret"));
        assert!(!stmt.to_string().contains("secret"));
    }
}
