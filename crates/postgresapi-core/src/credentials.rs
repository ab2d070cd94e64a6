// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic credential derivation.
//!
//! Credentials are never stored. Each one is a pure function of the process
//! salt, the instance name and the requesting host, and is recomputed
//! whenever it is needed.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;
use std::fmt;

use crate::naming::to_hex;

type HmacSha1 = Hmac<Sha1>;

/// Characters of the instance name kept in usernames and group names.
pub const NAME_PREFIX_LEN: usize = 10;

/// Hex characters of the password digest appended to usernames.
pub const USERNAME_DIGEST_LEN: usize = 6;

/// Literal appended to truncated group names.
pub const GROUP_SUFFIX: &str = "_group";

/// The full credential triple for an `(instance, host)` pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login role name.
    pub username: String,
    /// Login password (lowercase hex HMAC digest).
    pub password: String,
    /// Group role owning the instance database.
    pub group: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("group", &self.group)
            .finish()
    }
}

/// Username and password handed back to callers after `create_user`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct UserCredentials {
    /// Login role name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Derives usernames, passwords and group roles from a secret salt.
#[derive(Clone)]
pub struct CredentialDeriver {
    keyed: HmacSha1,
}

impl fmt::Debug for CredentialDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialDeriver").finish_non_exhaustive()
    }
}

impl CredentialDeriver {
    /// Create a deriver keyed with `salt`.
    pub fn new(salt: &[u8]) -> Self {
        let keyed = HmacSha1::new_from_slice(salt).expect("HMAC accepts keys of any length");
        Self { keyed }
    }

    /// HMAC-SHA1 over `name` followed by `host` (no separator), as lowercase hex.
    pub fn derive_password(&self, name: &str, host: &str) -> String {
        let mut mac = self.keyed.clone();
        mac.update(name.as_bytes());
        mac.update(host.as_bytes());
        to_hex(&mac.finalize().into_bytes())
    }

    /// First [`NAME_PREFIX_LEN`] characters of `name` followed by the first
    /// [`USERNAME_DIGEST_LEN`] hex characters of the password derived for
    /// that truncated prefix.
    ///
    /// For names longer than the prefix the digest is not the login
    /// password's, which is always derived from the full name.
    pub fn derive_username(&self, name: &str, host: &str) -> String {
        let mut username: String = name.chars().take(NAME_PREFIX_LEN).collect();
        let digest = self.derive_password(&username, host);
        username.push_str(&digest[..USERNAME_DIGEST_LEN]);
        username
    }

    /// Group role for an instance.
    ///
    /// Names longer than [`NAME_PREFIX_LEN`] are truncated and suffixed with
    /// [`GROUP_SUFFIX`]. Shorter names are used as-is, without a suffix.
    pub fn derive_group(&self, name: &str) -> String {
        if name.chars().count() > NAME_PREFIX_LEN {
            let mut group: String = name.chars().take(NAME_PREFIX_LEN).collect();
            group.push_str(GROUP_SUFFIX);
            group
        } else {
            name.to_string()
        }
    }

    /// Derive the whole credential triple.
    pub fn derive(&self, name: &str, host: &str) -> Credentials {
        Credentials {
            username: self.derive_username(name, host),
            password: self.derive_password(name, host),
            group: self.derive_group(name),
        }
    }
}
