// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance name canonicalization and validated SQL identifiers.
//!
//! Identifiers (database and role names) are interpolated directly into DDL
//! text, because PostgreSQL has no bind parameters for object names. The
//! [`Identifier`] type is the only way to get a name into a cluster
//! statement, and it can only be built from a string that consists entirely
//! of `[A-Za-z0-9_]`.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Number of hex characters of the content hash appended to rewritten names.
pub const CANONICAL_SUFFIX_LEN: usize = 10;

/// Longest identifier PostgreSQL keeps without truncation (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Render bytes as lowercase hex.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Normalize a caller-supplied name into a string usable as a SQL identifier.
///
/// Names made only of `[A-Za-z0-9_]` are returned unchanged. Otherwise every
/// run of other characters becomes a single `_` and the first
/// [`CANONICAL_SUFFIX_LEN`] hex characters of the SHA-1 of the *original*
/// name are appended, so distinct inputs that collapse to the same prefix
/// still map to distinct names.
///
/// The result never contains a disallowed character, so applying this twice
/// is the same as applying it once.
pub fn canonicalize(name: &str) -> String {
    if name.chars().all(is_identifier_char) {
        return name.to_string();
    }

    let mut canonical = String::with_capacity(name.len() + CANONICAL_SUFFIX_LEN);
    let mut in_run = false;
    for c in name.chars() {
        if is_identifier_char(c) {
            canonical.push(c);
            in_run = false;
        } else if !in_run {
            canonical.push('_');
            in_run = true;
        }
    }

    let digest = Sha1::digest(name.as_bytes());
    canonical.push_str(&to_hex(&digest)[..CANONICAL_SUFFIX_LEN]);
    canonical
}

/// Why a string was refused as an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// The string was empty.
    #[error("identifier must not be empty")]
    Empty,
    /// The string contains a character outside `[A-Za-z0-9_]`.
    #[error("identifier {identifier:?} contains illegal character {character:?}")]
    IllegalCharacter {
        /// The rejected identifier.
        identifier: String,
        /// The first offending character.
        character: char,
    },
    /// The string is longer than PostgreSQL keeps.
    #[error("identifier {identifier:?} is {len} bytes long (max {max})", max = MAX_IDENTIFIER_LEN)]
    TooLong {
        /// The rejected identifier.
        identifier: String,
        /// Its length in bytes.
        len: usize,
    },
}

/// A database or role name that is safe to interpolate into SQL text.
///
/// # Invariants
/// - Non-empty, at most [`MAX_IDENTIFIER_LEN`] bytes.
/// - Every character is in `[A-Za-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validate `raw` as-is. No rewriting is performed.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if let Some(character) = raw.chars().find(|c| !is_identifier_char(*c)) {
            return Err(IdentifierError::IllegalCharacter {
                identifier: raw.to_string(),
                character,
            });
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong {
                identifier: raw.to_string(),
                len: raw.len(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Canonicalize `name` and validate the result.
    pub fn canonical(name: &str) -> Result<Self, IdentifierError> {
        Self::parse(&canonicalize(name))
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_are_unchanged() {
        assert_eq!(canonicalize("foo"), "foo");
        assert_eq!(canonicalize("Foo_Bar_42"), "Foo_Bar_42");
        assert_eq!(canonicalize(""), "");
    }

    #[test]
    fn test_special_characters_are_rewritten_with_suffix() {
        // sha1("my db!") = 5036b48b44...
        assert_eq!(canonicalize("my db!"), "my_db_5036b48b44");
        assert_eq!(canonicalize("my-db"), "my_db493b56f50c");
    }

    #[test]
    fn test_runs_collapse_to_single_underscore() {
        // sha1("a  b") = a002b74afb...
        assert_eq!(canonicalize("a  b"), "a_ba002b74afb");
    }

    #[test]
    fn test_suffix_distinguishes_colliding_prefixes() {
        let a = canonicalize("my-db");
        let b = canonicalize("my db");
        assert_eq!(&a[..5], &b[..5]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        for name in ["my db!", "  ", "ünïcode name", "tab\tand\nnewline", "x", "ok_name"] {
            let once = canonicalize(name);
            assert_eq!(canonicalize(&once), once, "not idempotent for {:?}", name);
        }
    }

    #[test]
    fn test_non_ascii_letters_are_rewritten() {
        let canonical = canonicalize("café");
        assert!(canonical.starts_with("caf_"));
        assert_eq!(canonical.len(), "caf_".len() + CANONICAL_SUFFIX_LEN);
    }

    #[test]
    fn test_identifier_rejects_empty() {
        assert_eq!(Identifier::parse(""), Err(IdentifierError::Empty));
        assert_eq!(Identifier::canonical(""), Err(IdentifierError::Empty));
    }

    #[test]
    fn test_identifier_rejects_illegal_characters() {
        let err = Identifier::parse("drop table;").unwrap_err();
        assert!(matches!(
            err,
            IdentifierError::IllegalCharacter { character: ' ', .. }
        ));
    }

    #[test]
    fn test_identifier_rejects_overlong_names() {
        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(matches!(
            Identifier::parse(&long),
            Err(IdentifierError::TooLong { len: 64, .. })
        ));
        assert!(Identifier::parse(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn test_identifier_canonical_accepts_rewritten_names() {
        let id = Identifier::canonical("my db!").unwrap();
        assert_eq!(id.as_str(), "my_db_5036b48b44");
        assert_eq!(id.to_string(), "my_db_5036b48b44");
    }

    #[test]
    fn test_identifier_serde_validates() {
        let id: Identifier = serde_json::from_str("\"foo\"").unwrap();
        assert_eq!(id.as_str(), "foo");
        assert!(serde_json::from_str::<Identifier>("\"foo bar\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"foo\"");
    }
}
