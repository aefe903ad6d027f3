//! fOS Malicious Site Protection
//!
//! Client-side URL reputation check that never sends the visited hostname
//! anywhere.
//!
//! Architecture:
//! 1. Hostname → SHA-256 → 8-char hash prefix
//! 2. Prefix not in the in-memory index → safe (the common case)
//! 3. Full-hash filter regex matches the URL → block now
//! 4. Otherwise allow now, confirm against match records in the
//!    background and report "site blocked" late if confirmed

mod config;
mod detector;
mod hash;
mod interceptor;
mod memory;
mod page;
mod pattern;
mod prefix_index;
mod repository;
mod schedule;
mod settings;
mod update;

pub use config::{ConfigError, LookupFailurePolicy, ProtectionConfig};
pub use detector::{
    Escalation, EscalationOutcome, MaliciousSiteDetector, SiteBlockedCallback, Verdict,
};
pub use hash::{extract_hostname, HashError, HashPrefix, HostnameHash, HASH_LEN, PREFIX_LEN};
pub use interceptor::{BlockReason, InterceptResult, InterceptorStats, MaliciousSiteInterceptor};
pub use memory::{Dataset, DatasetError, DatasetFile, FilterRecord, InMemoryRepository, MatchRecord};
pub use page::{PageScope, PageToken};
pub use pattern::PatternMatcher;
pub use prefix_index::HashPrefixIndex;
pub use repository::{Filter, MaliciousSiteRepository, Match, RepositoryError};
pub use schedule::{RefreshKind, RefreshSchedule};
pub use settings::{
    Settings, SettingsError, SettingsSnapshot, SettingsState, DEFAULT_FILTER_SET_UPDATE_FREQUENCY,
    DEFAULT_HASH_PREFIX_UPDATE_FREQUENCY,
};
pub use update::{
    ConfigRefreshListener, ConfigRefreshObservers, FeatureState, RemoteFeatureConfig, UpdateTrigger,
};
