//! Configuration for the workflow engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on any single store call (milliseconds)
    pub store_timeout_ms: u64,
    /// Days between a notice and its objection deadline
    pub notice_objection_days: i64,
    /// Verify the case chain before every write
    pub verify_before_write: bool,
    /// Unit applied when a measurement omits one
    pub default_unit: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
            notice_objection_days: 30,
            verify_before_write: true,
            default_unit: "hectare".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_verify_before_write(mut self, verify: bool) -> Self {
        self.verify_before_write = verify;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.notice_objection_days, 30);
        assert!(config.verify_before_write);
        assert_eq!(config.default_unit, "hectare");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml("store_timeout_ms: 250\ndefault_unit: acre\n").unwrap();
        assert_eq!(config.store_timeout_ms, 250);
        assert_eq!(config.default_unit, "acre");
        assert_eq!(config.notice_objection_days, 30);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = EngineConfig::default().with_verify_before_write(false);
        let yaml = config.to_yaml().unwrap();
        assert_eq!(EngineConfig::from_yaml(&yaml).unwrap(), config);
    }
}
