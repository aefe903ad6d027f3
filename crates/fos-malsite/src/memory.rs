//! In-memory repository
//!
//! Holds the hash-prefix index, filters and matches as one immutable
//! snapshot behind an atomic pointer. Readers load the current snapshot
//! without locking; refreshes build a new snapshot and swap it in, so a
//! reader sees either the old data or the new data, never a mix.
//!
//! Dataset format (JSON, camelCase):
//!
//! ```json
//! {
//!   "hashPrefixes": ["255a8a79"],
//!   "filters": [{ "hash": "255a8a79...", "regex": ".*malicious.*" }],
//!   "matches": [{ "hostname": "malicious.com", "regexPattern": "https://malicious.com/*",
//!                 "regex": ".*malicious.*", "hash": "255a8a79..." }]
//! }
//! ```

use crate::hash::{HashError, HashPrefix, HostnameHash};
use crate::prefix_index::HashPrefixIndex;
use crate::repository::{Filter, MaliciousSiteRepository, Match, RepositoryError};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors while loading a dataset
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {field} at index {index}: {source}")]
    InvalidHash {
        field: &'static str,
        index: usize,
        #[source]
        source: HashError,
    },
}

/// Dataset document as stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetFile {
    #[serde(default)]
    pub hash_prefixes: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterRecord>,
    #[serde(default)]
    pub matches: Vec<MatchRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRecord {
    pub hash: String,
    pub regex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub hostname: String,
    pub regex_pattern: String,
    pub regex: String,
    pub hash: String,
}

/// Validated, indexed dataset
#[derive(Default)]
pub struct Dataset {
    pub index: Arc<HashPrefixIndex>,
    pub filters: Arc<HashMap<HostnameHash, Filter>>,
    pub matches: Arc<HashMap<HashPrefix, Vec<Match>>>,
}

impl Dataset {
    /// Validate and index a dataset document
    pub fn from_file(file: DatasetFile) -> Result<Self, DatasetError> {
        let prefixes = file
            .hash_prefixes
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                HashPrefix::parse(raw).map_err(|source| DatasetError::InvalidHash {
                    field: "hashPrefixes",
                    index,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let filters = file
            .filters
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let hash = HostnameHash::parse(&record.hash).map_err(|source| {
                    DatasetError::InvalidHash {
                        field: "filters.hash",
                        index,
                        source,
                    }
                })?;
                Ok(Filter::new(hash, record.regex))
            })
            .collect::<Result<Vec<_>, DatasetError>>()?;

        let matches = file
            .matches
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let hash = HostnameHash::parse(&record.hash).map_err(|source| {
                    DatasetError::InvalidHash {
                        field: "matches.hash",
                        index,
                        source,
                    }
                })?;
                Ok(Match::new(record.hostname, record.regex_pattern, record.regex, hash))
            })
            .collect::<Result<Vec<_>, DatasetError>>()?;

        Ok(Self {
            index: Arc::new(HashPrefixIndex::new(prefixes)),
            filters: Arc::new(index_filters(filters)),
            matches: Arc::new(index_matches(matches)),
        })
    }

    /// Parse a dataset from a JSON reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let file: DatasetFile = serde_json::from_reader(reader)?;
        Self::from_file(file)
    }
}

fn index_filters(filters: Vec<Filter>) -> HashMap<HostnameHash, Filter> {
    // Later entries win for duplicate hashes
    filters.into_iter().map(|f| (f.hash.clone(), f)).collect()
}

fn index_matches(matches: Vec<Match>) -> HashMap<HashPrefix, Vec<Match>> {
    let mut by_prefix: HashMap<HashPrefix, Vec<Match>> = HashMap::new();
    for m in matches {
        by_prefix.entry(m.hash.prefix()).or_default().push(m);
    }
    by_prefix
}

/// Repository backed by an atomically swapped in-memory snapshot
pub struct InMemoryRepository {
    snapshot: ArcSwap<Dataset>,
}

impl InMemoryRepository {
    /// Empty repository (nothing is a candidate)
    pub fn new() -> Self {
        Self::with_dataset(Dataset::default())
    }

    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(dataset),
        }
    }

    /// Load a dataset JSON file
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let dataset = Dataset::from_reader(std::io::BufReader::new(file))?;
        info!(
            "Loaded malicious site dataset from {}: {} prefixes, {} filters, {} match groups",
            path.display(),
            dataset.index.len(),
            dataset.filters.len(),
            dataset.matches.len()
        );
        Ok(Self::with_dataset(dataset))
    }

    /// Replace the whole dataset
    pub fn replace(&self, dataset: Dataset) {
        self.snapshot.store(Arc::new(dataset));
    }

    /// Replace the hash-prefix index, keeping filters and matches
    pub fn replace_hash_prefixes(&self, prefixes: Vec<HashPrefix>) {
        let index = Arc::new(HashPrefixIndex::new(prefixes));
        self.snapshot.rcu(|current| Dataset {
            index: Arc::clone(&index),
            filters: Arc::clone(&current.filters),
            matches: Arc::clone(&current.matches),
        });
        debug!("Hash prefixes replaced: {}", index.len());
    }

    /// Replace the filter set, keeping the prefix index and matches
    pub fn replace_filters(&self, filters: Vec<Filter>) {
        let filters = Arc::new(index_filters(filters));
        self.snapshot.rcu(|current| Dataset {
            index: Arc::clone(&current.index),
            filters: Arc::clone(&filters),
            matches: Arc::clone(&current.matches),
        });
        debug!("Filters replaced: {}", filters.len());
    }

    /// Replace the match records, keeping the prefix index and filters
    pub fn replace_matches(&self, matches: Vec<Match>) {
        let matches = Arc::new(index_matches(matches));
        self.snapshot.rcu(|current| Dataset {
            index: Arc::clone(&current.index),
            filters: Arc::clone(&current.filters),
            matches: Arc::clone(&matches),
        });
        debug!("Match groups replaced: {}", matches.len());
    }

    /// Sizes of the current snapshot: (prefixes, filters, match groups)
    pub fn stats(&self) -> (usize, usize, usize) {
        let snapshot = self.snapshot.load();
        (
            snapshot.index.len(),
            snapshot.filters.len(),
            snapshot.matches.len(),
        )
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MaliciousSiteRepository for InMemoryRepository {
    fn contains_hash_prefix(&self, prefix: &HashPrefix) -> Result<bool, RepositoryError> {
        Ok(self.snapshot.load().index.contains(prefix))
    }

    fn get_filter(&self, hash: &HostnameHash) -> Result<Option<Filter>, RepositoryError> {
        Ok(self.snapshot.load().filters.get(hash).cloned())
    }

    fn matches(&self, prefix: &HashPrefix) -> Result<Vec<Match>, RepositoryError> {
        Ok(self
            .snapshot
            .load()
            .matches
            .get(prefix)
            .cloned()
            .unwrap_or_default())
    }
}
