//! Hostname hashing
//!
//! A hostname is identified by the lowercase hex SHA-256 digest of its
//! bytes. Only the first 8 hex characters (the hash prefix) are used as the
//! lookup key, so a lookup reveals a coarse, many-to-one fingerprint rather
//! than the hostname itself.

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Length of a full hostname hash in hex characters
pub const HASH_LEN: usize = 64;

/// Length of a hash prefix in hex characters
pub const PREFIX_LEN: usize = 8;

/// Errors when parsing hashes from external data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("expected {expected} hex characters, got {actual}: {value}")]
    InvalidLength {
        expected: usize,
        actual: usize,
        value: String,
    },

    #[error("not a hex string: {0}")]
    InvalidHex(String),
}

/// Lowercase hex SHA-256 digest of a hostname
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostnameHash(String);

impl HostnameHash {
    /// Hash a hostname as-is (no scheme, path or port)
    pub fn of(hostname: &str) -> Self {
        let digest = Sha256::digest(hostname.as_bytes());
        Self(hex::encode(digest))
    }

    /// Parse a hash received from the block list.
    ///
    /// Uppercase input is accepted and folded to lowercase.
    pub fn parse(value: &str) -> Result<Self, HashError> {
        validate_hex(value, HASH_LEN).map(Self)
    }

    /// First [`PREFIX_LEN`] characters of the hash
    pub fn prefix(&self) -> HashPrefix {
        HashPrefix(self.0[..PREFIX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostnameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First 8 hex characters of a [`HostnameHash`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashPrefix(String);

impl HashPrefix {
    /// Parse a prefix received from the block list
    pub fn parse(value: &str) -> Result<Self, HashError> {
        validate_hex(value, PREFIX_LEN).map(Self)
    }

    /// Whether this prefix is the leading part of `hash`
    pub fn is_prefix_of(&self, hash: &HostnameHash) -> bool {
        hash.as_str().starts_with(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HashPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the hostname used for hashing.
///
/// Returns `None` for URLs without a host (`data:`, `about:blank`, ...),
/// which callers treat as a definitive "not malicious".
pub fn extract_hostname(url: &Url) -> Option<&str> {
    url.host_str().filter(|host| !host.is_empty())
}

fn validate_hex(value: &str, expected: usize) -> Result<String, HashError> {
    let value = value.trim();
    if value.len() != expected {
        return Err(HashError::InvalidLength {
            expected,
            actual: value.len(),
            value: value.to_string(),
        });
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HashError::InvalidHex(value.to_string()));
    }
    Ok(value.to_ascii_lowercase())
}
