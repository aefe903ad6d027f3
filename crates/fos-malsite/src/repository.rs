//! Malicious site repository contract
//!
//! The detector only reads from the repository. Storage, download and
//! refresh of the block list belong to the repository implementation.

use crate::hash::{HashPrefix, HostnameHash};
use thiserror::Error;

/// Errors reported by a repository query
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("repository data corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full-hash keyed rule confirming a malicious URL pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub hash: HostnameHash,
    /// Matched against the complete URL string
    pub regex: String,
}

impl Filter {
    pub fn new(hash: HostnameHash, regex: impl Into<String>) -> Self {
        Self {
            hash,
            regex: regex.into(),
        }
    }
}

/// Prefix keyed confirmation record from the slower lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub hostname: String,
    /// URL-shaped pattern the rule was derived from
    pub regex_pattern: String,
    /// Matched against the complete URL string
    pub regex: String,
    pub hash: HostnameHash,
}

impl Match {
    pub fn new(
        hostname: impl Into<String>,
        regex_pattern: impl Into<String>,
        regex: impl Into<String>,
        hash: HostnameHash,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            regex_pattern: regex_pattern.into(),
            regex: regex.into(),
            hash,
        }
    }
}

/// Read surface of the block list storage.
///
/// `contains_hash_prefix` and `get_filter` sit on the rendering path and
/// must answer from memory. `matches` is only called from escalation tasks
/// running on the blocking pool and may do I/O.
pub trait MaliciousSiteRepository: Send + Sync {
    fn contains_hash_prefix(&self, prefix: &HashPrefix) -> Result<bool, RepositoryError>;

    fn get_filter(&self, hash: &HostnameHash) -> Result<Option<Filter>, RepositoryError>;

    fn matches(&self, prefix: &HashPrefix) -> Result<Vec<Match>, RepositoryError>;
}
