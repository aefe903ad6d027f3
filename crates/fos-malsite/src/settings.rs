//! Protection settings state
//!
//! The feature flag and refresh cadences are written by the update trigger
//! and read by the detector on every check. Each update publishes a whole
//! new snapshot, so readers never see the flag from one refresh and the
//! intervals from another.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Default hash-prefix refresh cadence (minutes)
pub const DEFAULT_HASH_PREFIX_UPDATE_FREQUENCY: i64 = 20;

/// Default filter-set refresh cadence (minutes)
pub const DEFAULT_FILTER_SET_UPDATE_FREQUENCY: i64 = 720;

/// Settings decode errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Refresh cadences delivered by remote config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Minutes between hash-prefix refreshes
    pub hash_prefix_update_frequency: i64,
    /// Minutes between full filter-set refreshes
    pub filter_set_update_frequency: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hash_prefix_update_frequency: DEFAULT_HASH_PREFIX_UPDATE_FREQUENCY,
            filter_set_update_frequency: DEFAULT_FILTER_SET_UPDATE_FREQUENCY,
        }
    }
}

impl Settings {
    /// Decode the remote settings blob.
    ///
    /// Both fields are required integers; unknown fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One published view of the protection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettingsSnapshot {
    pub enabled: bool,
    pub settings: Settings,
}

/// Shared, atomically swapped settings
pub struct SettingsState {
    current: ArcSwap<SettingsSnapshot>,
}

impl SettingsState {
    /// Disabled, with default cadences
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Disabled, with the given cadences
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            current: ArcSwap::from_pointee(SettingsSnapshot {
                enabled: false,
                settings,
            }),
        }
    }

    pub fn is_feature_enabled(&self) -> bool {
        self.current.load().enabled
    }

    pub fn settings(&self) -> Settings {
        self.current.load().settings
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        **self.current.load()
    }

    /// Publish a new snapshot
    pub fn replace(&self, snapshot: SettingsSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Publish a snapshot derived from the current one.
    ///
    /// `f` may run more than once if another writer publishes concurrently;
    /// it always sees the snapshot it replaces. Returns (previous, published).
    pub fn update<F>(&self, mut f: F) -> (SettingsSnapshot, SettingsSnapshot)
    where
        F: FnMut(&SettingsSnapshot) -> SettingsSnapshot,
    {
        let mut published = None;
        let previous = self.current.rcu(|current| {
            let next = f(current);
            published = Some(next);
            next
        });
        (*previous, published.unwrap_or(*previous))
    }
}

impl Default for SettingsState {
    fn default() -> Self {
        Self::new()
    }
}
