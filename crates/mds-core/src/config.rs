//! mds.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service fields whose change re-triggers rule evaluation by default.
///
/// `category` is deliberately absent: the tagger's own appends must not
/// schedule another evaluation pass.
pub const DEFAULT_TRIGGER_FIELDS: [&str; 10] = [
    "service_name",
    "description",
    "more_about",
    "location",
    "target_segment",
    "pricing",
    "business_model",
    "deployment",
    "stage",
    "like",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MdsConfig {
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Upper bound for a single store call made by the dispatcher.
    pub call_timeout: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/mds/mds.redb"),
            call_timeout: "2s".to_string(),
        }
    }
}

/// What to do with the rest of a batch once one record fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub trigger_fields: Vec<String>,
    pub on_record_error: ErrorPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            trigger_fields: DEFAULT_TRIGGER_FIELDS.iter().map(|f| f.to_string()).collect(),
            on_record_error: ErrorPolicy::Continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval: String,
    pub batch_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: "1s".to_string(),
            batch_size: 100,
        }
    }
}

impl MdsConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MdsConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config rooted at `data_dir`.
    pub fn scaffold(data_dir: &Path) -> Self {
        MdsConfig {
            store: StoreConfig {
                path: data_dir.join("mds.redb"),
                ..StoreConfig::default()
            },
            ..MdsConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store_call_timeout()?;
        self.stream_poll_interval()?;
        if self.stream.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "stream.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(field) = self.dispatch.trigger_fields.iter().find(|f| f.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "dispatch.trigger_fields",
                reason: format!("empty field name {field:?}"),
            });
        }
        Ok(())
    }

    pub fn store_call_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.store.call_timeout)
    }

    pub fn stream_poll_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.stream.poll_interval)
    }
}

/// Parse a duration string like "500ms", "2s", "5m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold() {
        let config = MdsConfig::scaffold(Path::new("/tmp/mds"));
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("/tmp/mds/mds.redb"));
        assert!(toml_str.contains("call_timeout"));
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config: MdsConfig = toml::from_str("").unwrap();
        assert_eq!(config, MdsConfig::default());
        assert_eq!(config.store_call_timeout().unwrap(), Duration::from_secs(2));
        assert_eq!(config.dispatch.on_record_error, ErrorPolicy::Continue);
        assert!(config.dispatch.trigger_fields.iter().any(|f| f == "like"));
        assert!(!config.dispatch.trigger_fields.iter().any(|f| f == "category"));
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[store]
call_timeout = "750ms"

[dispatch]
trigger_fields = ["description"]
on_record_error = "abort"
"#;
        let config: MdsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store_call_timeout().unwrap(), Duration::from_millis(750));
        assert_eq!(config.dispatch.trigger_fields, vec!["description".to_string()]);
        assert_eq!(config.dispatch.on_record_error, ErrorPolicy::Abort);
        assert_eq!(config.stream.batch_size, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MdsConfig::default();
        config.store.call_timeout = "soon".to_string();
        assert!(config.validate().is_err());

        let mut config = MdsConfig::default();
        config.stream.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert!(parse_duration("").is_err());
    }
}
