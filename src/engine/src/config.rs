//! Engine configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Keys the engine reads and writes in the key-value store
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StorageKeys {
    pub events: String,
    pub schema_version: String,
    pub backup_prefix: String,
    pub quarantine: String,
    pub recovery_flag: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            events: "events".to_string(),
            schema_version: "events_schema_version".to_string(),
            backup_prefix: "events_backup_".to_string(),
            quarantine: "events_corrupted".to_string(),
            recovery_flag: "legacy_notification_recovery_done".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub schema_version: u32,
    pub max_roll_forward_iterations: u32,
    /// Reminders due sooner than this are not handed to the scheduler
    pub min_schedule_lead_secs: i64,
    pub backups_to_keep: usize,
    pub scheduler_timeout_ms: u64,
    pub scheduler_retries: u32,
    pub default_timezone: String,
    pub free_notes_limit: usize,
    pub pro_notes_limit: usize,
    pub keys: StorageKeys,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: 2,
            max_roll_forward_iterations: 100,
            min_schedule_lead_secs: 5,
            backups_to_keep: 3,
            scheduler_timeout_ms: 5_000,
            scheduler_retries: 2,
            default_timezone: "UTC".to_string(),
            free_notes_limit: 200,
            pro_notes_limit: 2_000,
            keys: StorageKeys::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn scheduler_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler_timeout_ms)
    }

    pub fn min_schedule_lead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_schedule_lead_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            min_schedule_lead_secs = 30
            backups_to_keep = 5

            [keys]
            events = "countdowns"
            "#,
        )
        .unwrap();

        assert_eq!(config.min_schedule_lead_secs, 30);
        assert_eq!(config.backups_to_keep, 5);
        assert_eq!(config.keys.events, "countdowns");
        assert_eq!(config.keys.quarantine, "events_corrupted");
        assert_eq!(config.max_roll_forward_iterations, 100);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("backups_to_keep = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
