//! Event collection schema migration
//!
//! Strategy:
//! - Gated by the persisted schema version; runs once per version bump
//! - Unparseable collections are quarantined and the primary key cleared
//! - The raw pre-migration document is backed up under a timestamped key first
//! - Field backfills run on raw JSON so older shapes still deserialize
//! - Nothing is written unless every event survives and validates
//! - Any failure after the backup restores the backup
//! - Only the most recent backups are kept, whether or not the run committed

use crate::builder;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::plan;
use crate::storage::KeyValueStore;
use crate::types::*;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

// ============================================================================
// Backfill & Validation
// ============================================================================

fn is_missing(map: &Map<String, Value>, field: &str) -> bool {
    matches!(map.get(field), None | Some(Value::Null))
}

fn backfill_event(value: Value, config: &EngineConfig, is_entitled: bool, now: &Timestamp) -> EngineResult<Event> {
    let Value::Object(mut map) = value else {
        return Err(EngineError::Validation("event entry is not an object".to_string()));
    };

    for field in ["name", "notes", "icon"] {
        if is_missing(&map, field) {
            map.insert(field.to_string(), Value::String(String::new()));
        }
    }
    for field in ["templateId", "reminderPresetId"] {
        map.entry(field).or_insert(Value::Null);
    }

    let recurrence = map
        .get("recurrence")
        .and_then(Value::as_str)
        .map(Recurrence::parse)
        .unwrap_or_default();
    map.insert("recurrence".to_string(), serde_json::to_value(recurrence)?);

    if is_missing(&map, "createdAt") {
        if let Some(date) = map.get("date").cloned() {
            map.insert("createdAt".to_string(), date);
        }
    }

    let plan_is_valid = map
        .get("reminderPlan")
        .map(|plan| serde_json::from_value::<ReminderPlan>(plan.clone()).is_ok())
        .unwrap_or(false);
    if !plan_is_valid {
        let inferred = plan::infer_default_plan(
            map.get("reminderPresetId").and_then(Value::as_str),
            &config.default_timezone,
        );
        map.insert("reminderPlan".to_string(), serde_json::to_value(inferred)?);
    }

    let reminders = map
        .remove("reminders")
        .and_then(|raw| serde_json::from_value::<Vec<ReminderInstance>>(raw).ok());

    let mut event: Event = serde_json::from_value(Value::Object(map))?;
    event.reminders = match reminders {
        Some(reminders) => reminders,
        None => builder::build_reminders_for_event(&event, is_entitled, now),
    };
    Ok(event)
}

fn validate(events: &[Event], expected: usize) -> EngineResult<()> {
    if events.len() != expected {
        return Err(EngineError::Validation(format!(
            "migrated {} events but started with {}",
            events.len(),
            expected
        )));
    }

    let mut seen = HashSet::new();
    for event in events {
        if event.id.trim().is_empty() {
            return Err(EngineError::Validation("event without an id".to_string()));
        }
        if !seen.insert(event.id.as_str()) {
            return Err(EngineError::Validation(format!("duplicate event id {}", event.id)));
        }
    }
    Ok(())
}

/// Backfill and validate a raw collection without touching storage
pub fn migrate_collection(
    items: Vec<Value>,
    config: &EngineConfig,
    is_entitled: bool,
    now: &Timestamp,
) -> EngineResult<Vec<Event>> {
    let expected = items.len();
    let events = items
        .into_iter()
        .map(|item| backfill_event(item, config, is_entitled, now))
        .collect::<EngineResult<Vec<_>>>()?;
    validate(&events, expected)?;
    Ok(events)
}

// ============================================================================
// Storage Steps
// ============================================================================

async fn mark_current(store: &dyn KeyValueStore, config: &EngineConfig) -> EngineResult<()> {
    store
        .set(&config.keys.schema_version, &config.schema_version.to_string())
        .await
}

async fn quarantine(store: &dyn KeyValueStore, config: &EngineConfig, raw: &str) -> MigrationOutcome {
    let keys = &config.keys;
    if let Err(err) = store.set(&keys.quarantine, raw).await {
        error!(error = %err, "could not quarantine corrupt event collection");
        return MigrationOutcome::Aborted {
            reason: err.to_string(),
            restored: false,
        };
    }

    if let Err(err) = store.remove(&keys.events).await {
        warn!(error = %err, "could not clear corrupt event collection after quarantine");
    }
    if let Err(err) = mark_current(store, config).await {
        warn!(error = %err, "could not mark schema version after quarantine");
    }

    warn!(key = %keys.quarantine, "quarantined corrupt event collection");
    MigrationOutcome::Quarantined {
        quarantine_key: keys.quarantine.clone(),
    }
}

/// Put the pre-migration document back, from memory first and then from the backup key
async fn restore_backup(store: &dyn KeyValueStore, config: &EngineConfig, backup_key: &str, raw: &str) -> bool {
    let keys = &config.keys;
    match store.set(&keys.events, raw).await {
        Ok(()) => return true,
        Err(err) => error!(error = %err, "restore from in-memory copy failed"),
    }

    match store.get(backup_key).await {
        Ok(Some(backup)) => match store.set(&keys.events, &backup).await {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, backup_key, "restore from backup key failed");
                false
            }
        },
        Ok(None) => {
            error!(backup_key, "backup key is missing, nothing to restore");
            false
        }
        Err(err) => {
            error!(error = %err, backup_key, "could not read backup key");
            false
        }
    }
}

async fn prune_backups(store: &dyn KeyValueStore, config: &EngineConfig) {
    let prefix = &config.keys.backup_prefix;
    let keys = match store.list_keys().await {
        Ok(keys) => keys,
        Err(err) => {
            warn!(error = %err, "could not list keys to prune backups");
            return;
        }
    };

    let mut backups: Vec<(i64, String)> = keys
        .into_iter()
        .filter_map(|key| {
            let stamp = key.strip_prefix(prefix.as_str())?.parse::<i64>().ok()?;
            Some((stamp, key))
        })
        .collect();
    backups.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, key) in backups.into_iter().skip(config.backups_to_keep) {
        match store.remove(&key).await {
            Ok(()) => debug!(key = %key, "pruned old backup"),
            Err(err) => warn!(key = %key, error = %err, "could not prune backup"),
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Bring the persisted collection to the current schema. Never fails; the
/// outcome says what happened and whether original data had to be restored.
pub async fn migrate_events(
    store: &dyn KeyValueStore,
    clock: &dyn Clock,
    config: &EngineConfig,
    is_entitled: bool,
) -> MigrationOutcome {
    let keys = &config.keys;

    match store.get(&keys.schema_version).await {
        Ok(version) if version.as_deref().and_then(|v| v.trim().parse::<u32>().ok()) >= Some(config.schema_version) => {
            return MigrationOutcome::AlreadyCurrent;
        }
        Ok(_) => {}
        Err(err) => {
            warn!(error = %err, "could not read schema version, skipping migration");
            return MigrationOutcome::Aborted {
                reason: err.to_string(),
                restored: false,
            };
        }
    }

    let raw = match store.get(&keys.events).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, "could not read event collection, skipping migration");
            return MigrationOutcome::Aborted {
                reason: err.to_string(),
                restored: false,
            };
        }
    };

    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => {
            if let Err(err) = mark_current(store, config).await {
                warn!(error = %err, "could not mark schema version");
            }
            return MigrationOutcome::NothingToMigrate;
        }
    };

    let items = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) | Err(_) => return quarantine(store, config, &raw).await,
    };

    let now = clock.now();
    let backup_key = format!("{}{}", keys.backup_prefix, now.timestamp_millis());
    if let Err(err) = store.set(&backup_key, &raw).await {
        error!(error = %err, "could not back up event collection, leaving it untouched");
        return MigrationOutcome::Aborted {
            reason: err.to_string(),
            restored: false,
        };
    }

    let events = match migrate_collection(items, config, is_entitled, &now.fixed_offset()) {
        Ok(events) => events,
        Err(err) => {
            warn!(error = %err, "migration failed validation, original data left in place");
            prune_backups(store, config).await;
            return MigrationOutcome::Aborted {
                reason: err.to_string(),
                restored: false,
            };
        }
    };

    let written = match serde_json::to_string(&events) {
        Ok(serialized) => store.set(&keys.events, &serialized).await,
        Err(err) => Err(err.into()),
    };
    let committed = match written {
        Ok(()) => mark_current(store, config).await,
        Err(err) => Err(err),
    };

    if let Err(err) = committed {
        error!(error = %err, "migration write failed, restoring backup");
        let restored = restore_backup(store, config, &backup_key, &raw).await;
        prune_backups(store, config).await;
        return MigrationOutcome::Aborted {
            reason: err.to_string(),
            restored,
        };
    }

    prune_backups(store, config).await;

    info!(events = events.len(), backup_key = %backup_key, "migrated event collection");
    MigrationOutcome::Migrated {
        events: events.len(),
        backup_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;

    fn now() -> Timestamp {
        DateTime::parse_from_rfc3339("2030-06-01T12:00:00Z").unwrap()
    }

    #[test]
    fn backfills_legacy_fields() {
        let legacy = json!({
            "id": "evt-1",
            "name": "Trip",
            "date": "2030-06-10T09:00:00.000Z",
            "recurrence": "fortnightly",
            "reminderPresetId": "standard"
        });

        let events = migrate_collection(vec![legacy], &EngineConfig::default(), true, &now()).unwrap();
        let event = &events[0];

        assert_eq!(event.notes, "");
        assert_eq!(event.template_id, None);
        assert_eq!(event.recurrence, Recurrence::None);
        assert_eq!(event.created_at, event.date);
        assert_eq!(event.reminder_plan, ReminderPlan::new(ReminderPreset::Standard, "UTC"));
        assert_eq!(event.reminders.len(), 2);
    }

    #[test]
    fn keeps_valid_reminders_and_rebuilds_invalid_ones() {
        let valid = json!({
            "id": "evt-1",
            "name": "Kept",
            "date": "2030-06-10T09:00:00Z",
            "createdAt": "2030-01-01T00:00:00Z",
            "reminders": []
        });
        let invalid = json!({
            "id": "evt-2",
            "name": "Rebuilt",
            "date": "2030-06-10T09:00:00Z",
            "createdAt": "2030-01-01T00:00:00Z",
            "reminders": "oops"
        });

        let events = migrate_collection(vec![valid, invalid], &EngineConfig::default(), false, &now()).unwrap();
        assert!(events[0].reminders.is_empty());
        assert_eq!(events[1].reminders.len(), 1);
    }

    #[test]
    fn missing_name_backfills_to_empty() {
        let unnamed = json!({ "id": "evt-1", "name": null, "date": "2030-06-10T09:00:00Z" });
        let events = migrate_collection(vec![unnamed], &EngineConfig::default(), false, &now()).unwrap();
        assert_eq!(events[0].name, "");
    }

    #[test]
    fn event_without_date_fails_the_whole_collection() {
        let broken = json!({ "id": "evt-1", "name": "No date" });
        assert!(migrate_collection(vec![broken], &EngineConfig::default(), false, &now()).is_err());
    }

    #[test]
    fn blank_or_duplicate_ids_fail_validation() {
        let blank = json!({ "id": " ", "name": "x", "date": "2030-06-10T09:00:00Z" });
        assert!(matches!(
            migrate_collection(vec![blank], &EngineConfig::default(), false, &now()),
            Err(EngineError::Validation(_))
        ));

        let a = json!({ "id": "same", "name": "a", "date": "2030-06-10T09:00:00Z" });
        let b = json!({ "id": "same", "name": "b", "date": "2030-06-11T09:00:00Z" });
        assert!(matches!(
            migrate_collection(vec![a, b], &EngineConfig::default(), false, &now()),
            Err(EngineError::Validation(_))
        ));
    }
}
