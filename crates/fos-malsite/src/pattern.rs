//! Rule regex evaluation
//!
//! Filter and match rules carry a regex that must match the *entire* URL
//! string. Compiled regexes are cached because the same rules are evaluated
//! over and over for every resource on a flagged host.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Maximum number of cached compiled patterns
const DEFAULT_CACHE_ENTRIES: usize = 1024;

/// Compiles rule regexes with a size limit and caches the result
pub struct PatternMatcher {
    /// Compiled program size limit (bytes)
    size_limit: usize,
    /// Maximum cache size
    max_entries: usize,
    /// Pattern text -> compiled, anchored regex. `None` marks invalid patterns.
    cache: RwLock<HashMap<String, Option<Regex>>>,
}

impl PatternMatcher {
    pub fn new(size_limit: usize) -> Self {
        Self {
            size_limit,
            max_entries: DEFAULT_CACHE_ENTRIES,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Full-string match of `pattern` against `input`.
    ///
    /// Invalid patterns never match.
    pub fn full_match(&self, pattern: &str, input: &str) -> bool {
        match self.compiled(pattern) {
            Some(regex) => regex.is_match(input),
            None => false,
        }
    }

    fn compiled(&self, pattern: &str) -> Option<Regex> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(pattern) {
                return entry.clone();
            }
        }

        let compiled = match RegexBuilder::new(&format!("^(?:{})$", pattern))
            .size_limit(self.size_limit)
            .build()
        {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Ignoring invalid rule pattern {:?}: {}", pattern, e);
                None
            }
        };

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.max_entries {
            debug!("Pattern cache full ({} entries), clearing", cache.len());
            cache.clear();
        }
        cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }

    /// Number of cached patterns
    pub fn cached(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
