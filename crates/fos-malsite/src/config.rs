//! Protection Configuration
//!
//! Local (not remote) configuration of the detector. Loaded from TOML.

use crate::settings::{
    Settings, DEFAULT_FILTER_SET_UPDATE_FREQUENCY, DEFAULT_HASH_PREFIX_UPDATE_FREQUENCY,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Verdict to use when the repository cannot answer on the rendering path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// Treat as not malicious, the page loads
    FailOpen,
    /// Treat as malicious, the load is blocked
    FailClosed,
}

impl Default for LookupFailurePolicy {
    fn default() -> Self {
        LookupFailurePolicy::FailOpen
    }
}

impl LookupFailurePolicy {
    /// Verdict returned for a failed lookup
    pub fn verdict(self) -> bool {
        matches!(self, LookupFailurePolicy::FailClosed)
    }
}

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// What a failed synchronous lookup resolves to
    pub failure_policy: LookupFailurePolicy,

    /// Whether inconclusive checks escalate to the background match lookup
    pub escalation_enabled: bool,

    /// Compiled size limit for rule regexes (bytes)
    /// Default: 1 MB
    pub max_regex_size: usize,

    /// Hash-prefix cadence until remote settings arrive (minutes)
    pub default_hash_prefix_update_frequency: i64,

    /// Filter-set cadence until remote settings arrive (minutes)
    pub default_filter_set_update_frequency: i64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            failure_policy: LookupFailurePolicy::FailOpen,
            escalation_enabled: true,
            max_regex_size: 1024 * 1024,
            default_hash_prefix_update_frequency: DEFAULT_HASH_PREFIX_UPDATE_FREQUENCY,
            default_filter_set_update_frequency: DEFAULT_FILTER_SET_UPDATE_FREQUENCY,
        }
    }
}

impl ProtectionConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Settings in effect before the first remote refresh
    pub fn default_settings(&self) -> Settings {
        Settings {
            hash_prefix_update_frequency: self.default_hash_prefix_update_frequency,
            filter_set_update_frequency: self.default_filter_set_update_frequency,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_regex_size < 1024 {
            return Err(ConfigError::RegexSizeTooSmall);
        }
        if self.default_hash_prefix_update_frequency <= 0 {
            return Err(ConfigError::InvalidFrequency("default_hash_prefix_update_frequency"));
        }
        if self.default_filter_set_update_frequency <= 0 {
            return Err(ConfigError::InvalidFrequency("default_filter_set_update_frequency"));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Regex size limit too small (minimum 1KB)")]
    RegexSizeTooSmall,

    #[error("{0} must be positive")]
    InvalidFrequency(&'static str),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProtectionConfig::default();

        assert_eq!(config.failure_policy, LookupFailurePolicy::FailOpen);
        assert!(config.escalation_enabled);
        assert_eq!(config.default_settings(), Settings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ProtectionConfig::from_toml_str(
            r#"
failure_policy = "fail_closed"
default_hash_prefix_update_frequency = 5
"#,
        )
        .unwrap();

        assert_eq!(config.failure_policy, LookupFailurePolicy::FailClosed);
        assert!(config.failure_policy.verdict());
        assert_eq!(config.default_hash_prefix_update_frequency, 5);
        assert_eq!(config.default_filter_set_update_frequency, 720);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ProtectionConfig::default();
        config.max_regex_size = 10;
        assert!(matches!(config.validate(), Err(ConfigError::RegexSizeTooSmall)));

        let mut config = ProtectionConfig::default();
        config.default_filter_set_update_frequency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFrequency(_))));

        assert!(matches!(
            ProtectionConfig::from_toml_str("failure_policy = \"maybe\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
