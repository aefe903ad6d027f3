//! Remote feature config sources
//!
//! The privacy config download is not part of the browser binary yet. The
//! feature entry is either fixed or read from a local JSON file shaped like
//! one feature of the privacy config:
//!
//! ```json
//! { "state": "enabled",
//!   "settings": { "hashPrefixUpdateFrequency": 20, "filterSetUpdateFrequency": 720 } }
//! ```

use fos_malsite::{FeatureState, RemoteFeatureConfig};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Feature entry as it appears in the privacy config
#[derive(Debug, Deserialize)]
struct FeatureEntry {
    state: String,
    #[serde(default)]
    settings: Option<serde_json::Value>,
}

impl FeatureEntry {
    fn is_enabled(&self) -> bool {
        self.state == "enabled"
    }

    fn settings_json(&self) -> Option<String> {
        self.settings.as_ref().map(|settings| settings.to_string())
    }
}

/// Feature entry re-read from disk on every refresh
pub struct FileRemoteConfig {
    path: PathBuf,
}

impl FileRemoteConfig {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Option<FeatureEntry> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Invalid feature entry in {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl RemoteFeatureConfig for FileRemoteConfig {
    fn is_enabled(&self) -> bool {
        self.read().is_some_and(|entry| entry.is_enabled())
    }

    fn settings_json(&self) -> Option<String> {
        self.read()?.settings_json()
    }

    /// One read, so the toggle and settings come from the same file version
    fn feature_state(&self) -> FeatureState {
        match self.read() {
            Some(entry) => FeatureState {
                enabled: entry.is_enabled(),
                settings_json: entry.settings_json(),
            },
            None => FeatureState::default(),
        }
    }
}

/// Fixed feature entry
pub struct StaticRemoteConfig {
    enabled: bool,
    settings: Option<String>,
}

impl StaticRemoteConfig {
    /// Enabled, with no settings blob (local defaults apply)
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            settings: None,
        }
    }
}

impl RemoteFeatureConfig for StaticRemoteConfig {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn settings_json(&self) -> Option<String> {
        self.settings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("fos-wb-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_file_remote_config() {
        let path = write_temp(
            "enabled.json",
            r#"{"state": "enabled", "settings": {"hashPrefixUpdateFrequency": 5, "filterSetUpdateFrequency": 50}}"#,
        );
        let remote = FileRemoteConfig::new(path.clone());

        assert!(remote.is_enabled());
        let settings = fos_malsite::Settings::from_json(&remote.settings_json().unwrap()).unwrap();
        assert_eq!(settings.hash_prefix_update_frequency, 5);
        assert_eq!(settings.filter_set_update_frequency, 50);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_file_feature_state_from_one_read() {
        let path = write_temp(
            "state.json",
            r#"{"state": "enabled", "settings": {"hashPrefixUpdateFrequency": 7, "filterSetUpdateFrequency": 70}}"#,
        );
        let remote = FileRemoteConfig::new(path.clone());

        let feature = remote.feature_state();
        // Later edits do not leak into a state already read
        std::fs::write(&path, r#"{"state": "disabled"}"#).unwrap();

        assert!(feature.enabled);
        let settings = fos_malsite::Settings::from_json(&feature.settings_json.unwrap()).unwrap();
        assert_eq!(settings.hash_prefix_update_frequency, 7);
        assert_eq!(settings.filter_set_update_frequency, 70);
        assert_eq!(remote.feature_state(), FeatureState::default());

        let missing = FileRemoteConfig::new(PathBuf::from("/nonexistent/fos-wb/state.json"));
        assert_eq!(missing.feature_state(), FeatureState::default());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_file_remote_config_disabled_or_missing() {
        let path = write_temp("disabled.json", r#"{"state": "disabled"}"#);
        let remote = FileRemoteConfig::new(path.clone());
        assert!(!remote.is_enabled());
        assert!(remote.settings_json().is_none());
        std::fs::remove_file(path).ok();

        let missing = FileRemoteConfig::new(PathBuf::from("/nonexistent/fos-wb/feature.json"));
        assert!(!missing.is_enabled());
        assert!(missing.settings_json().is_none());
    }

    #[test]
    fn test_static_remote_config() {
        let remote = StaticRemoteConfig::enabled();
        assert!(remote.is_enabled());
        assert!(remote.settings_json().is_none());
    }
}
