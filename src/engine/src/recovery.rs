//! Legacy notification recovery
//!
//! Builds that predate the `reminders` array scheduled a single notification per
//! event and remembered it in `Event::notification_id`. This pass walks the OS queue
//! once and records a reminder for every live notification that belongs to an event
//! but has no reminder yet.
//! - Match by the event's legacy handle, else by `eventId` in the notification metadata
//! - Fire time comes from the trigger (absolute date, or now + interval)
//! - Labels are parsed from the notification text, else derived from the offset
//! - Unmatched notifications are counted and left scheduled

use crate::builder;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::notifications::{call_with_retry, NotificationScheduler};
use crate::recurrence;
use crate::storage::{self, KeyValueStore};
use crate::types::*;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(\d+)\s*(minute|min|hour|hr|day|week)s?\b").expect("static regex")
    })
}

fn at_start_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\b(now|today|starting|started)\b").expect("static regex"))
}

/// Best-effort label from notification text: "starts in 2 hours" -> "2 hours before"
pub fn parse_type_label(title: &str, body: &str) -> Option<String> {
    for text in [body, title] {
        if let Some(caps) = duration_pattern().captures(text) {
            let count: i64 = caps[1].parse().ok()?;
            let unit_minutes = match caps[2].to_ascii_lowercase().as_str() {
                "minute" | "min" => 1,
                "hour" | "hr" => 60,
                "day" => 1440,
                _ => 10080,
            };
            return Some(builder::type_label(count * unit_minutes));
        }
    }

    if at_start_pattern().is_match(body) || at_start_pattern().is_match(title) {
        return Some(builder::type_label(0));
    }
    None
}

fn fire_time(trigger: &NotificationTrigger, now: &Timestamp) -> Option<Timestamp> {
    match trigger {
        NotificationTrigger::Date { at } => Some(*at),
        NotificationTrigger::TimeInterval { seconds } => {
            now.checked_add_signed(chrono::Duration::try_seconds(*seconds)?)
        }
        NotificationTrigger::Unknown => None,
    }
}

fn belongs_to(event: &Event, notification: &ScheduledNotification) -> bool {
    event.notification_id.as_deref() == Some(notification.handle_id.as_str())
        || notification.content.data.event_id.as_deref() == Some(event.id.as_str())
}

fn already_recorded(event: &Event, notification: &ScheduledNotification) -> bool {
    event.reminders.iter().any(|reminder| {
        reminder.notification_id.as_deref() == Some(notification.handle_id.as_str())
            || notification.content.data.reminder_id.as_deref() == Some(reminder.id.as_str())
    })
}

/// Reminder for a live notification, or `None` when its trigger gives no fire time
pub fn synthesize_reminder(event: &Event, notification: &ScheduledNotification, now: &Timestamp) -> Option<ReminderInstance> {
    let fire_at = fire_time(&notification.trigger, now)?;
    let occurrence = event.occurrence();
    let offset_minutes = (occurrence - fire_at).num_minutes();
    let aligned = offset_minutes >= 0 && (occurrence - fire_at).num_seconds() == offset_minutes * 60;

    let id = match notification.content.data.reminder_id.as_deref() {
        Some(reminder_id) => reminder_id.to_string(),
        None if aligned => recurrence::generate_reminder_id(&event.id, offset_minutes, &occurrence),
        // Kept by `builder::rebuild_event_reminders` until it fires
        None => recurrence::generate_recovered_reminder_id(&event.id, &notification.handle_id),
    };

    let type_label = parse_type_label(&notification.content.title, &notification.content.body)
        .unwrap_or_else(|| {
            if offset_minutes >= 0 {
                builder::type_label(offset_minutes)
            } else {
                "Reminder".to_string()
            }
        });

    Some(ReminderInstance {
        id,
        event_id: event.id.clone(),
        fire_at,
        type_label,
        enabled: true,
        notification_id: Some(notification.handle_id.clone()),
        offset_minutes: offset_minutes.max(0),
    })
}

async fn recover(
    store: &dyn KeyValueStore,
    scheduler: &dyn NotificationScheduler,
    clock: &dyn Clock,
    config: &EngineConfig,
) -> EngineResult<RecoveryReport> {
    let mut events = storage::load_events(store, &config.keys).await?;
    let notifications = call_with_retry(config, "list", || scheduler.list_all_scheduled_notifications()).await?;
    let now = clock.now_fixed();

    let mut report = RecoveryReport::default();
    for notification in &notifications {
        let Some(event) = events.iter_mut().find(|event| belongs_to(event, notification)) else {
            report.unmatched += 1;
            continue;
        };

        if already_recorded(event, notification) {
            report.already_recorded += 1;
            continue;
        }

        match synthesize_reminder(event, notification, &now) {
            Some(reminder) => {
                // Migration may already have rebuilt this reminder without its handle
                match event.reminders.iter_mut().find(|existing| existing.id == reminder.id) {
                    Some(existing) => existing.notification_id = reminder.notification_id,
                    None => {
                        event.reminders.push(reminder);
                        event
                            .reminders
                            .sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
                    }
                }
                report.recovered += 1;
            }
            None => report.unrecoverable += 1,
        }
    }

    if report.recovered > 0 {
        storage::save_events(store, &config.keys, &events).await?;
    }
    store.set(&config.keys.recovery_flag, &now.to_rfc3339()).await?;
    Ok(report)
}

/// Run legacy recovery once. Failures leave stored events untouched and the
/// completion flag unset, so the next start tries again.
pub async fn recover_legacy_notifications(
    store: &dyn KeyValueStore,
    scheduler: &dyn NotificationScheduler,
    clock: &dyn Clock,
    config: &EngineConfig,
) -> RecoveryReport {
    match store.get(&config.keys.recovery_flag).await {
        Ok(Some(_)) => {
            return RecoveryReport {
                already_completed: true,
                ..RecoveryReport::default()
            };
        }
        Ok(None) => {}
        Err(err) => {
            warn!(error = %err, "could not read recovery flag");
            return RecoveryReport {
                failed: Some(err.to_string()),
                ..RecoveryReport::default()
            };
        }
    }

    match recover(store, scheduler, clock, config).await {
        Ok(report) => {
            info!(
                recovered = report.recovered,
                already_recorded = report.already_recorded,
                unmatched = report.unmatched,
                unrecoverable = report.unrecoverable,
                "legacy notification recovery finished"
            );
            report
        }
        Err(err) => {
            warn!(error = %err, "legacy notification recovery failed");
            RecoveryReport {
                failed: Some(err.to_string()),
                ..RecoveryReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn at(value: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(value).unwrap()
    }

    fn legacy_notification(handle: &str, trigger: NotificationTrigger, body: &str) -> ScheduledNotification {
        ScheduledNotification {
            handle_id: handle.to_string(),
            content: NotificationContent {
                title: "Wedding".to_string(),
                body: body.to_string(),
                data: NotificationData::default(),
            },
            trigger,
        }
    }

    #[test]
    fn labels_parse_from_text() {
        assert_eq!(parse_type_label("Wedding", "Wedding starts in 2 hours").as_deref(), Some("2 hours before"));
        assert_eq!(parse_type_label("Wedding", "1 week to go!").as_deref(), Some("7 days before"));
        assert_eq!(parse_type_label("Wedding", "30 min left").as_deref(), Some("30 minutes before"));
        assert_eq!(parse_type_label("Wedding", "Wedding is starting now").as_deref(), Some("At start"));
        assert_eq!(parse_type_label("Wedding", "Don't forget"), None);
    }

    #[test]
    fn interval_trigger_is_relative_to_now() {
        let now = at("2030-06-01T12:00:00Z");
        assert_eq!(
            fire_time(&NotificationTrigger::TimeInterval { seconds: 3600 }, &now),
            Some(at("2030-06-01T13:00:00Z"))
        );
        assert_eq!(fire_time(&NotificationTrigger::Unknown, &now), None);
    }

    #[test]
    fn aligned_reminder_gets_the_builder_id() {
        let now = at("2030-06-01T12:00:00Z");
        let event = Event::new("evt-1", "Wedding", at("2030-06-10T15:00:00Z"), now);
        let notification = legacy_notification(
            "legacy-1",
            NotificationTrigger::Date { at: at("2030-06-09T15:00:00Z") },
            "Don't forget",
        );

        let reminder = synthesize_reminder(&event, &notification, &now).unwrap();
        assert_eq!(reminder.id, recurrence::generate_reminder_id("evt-1", 1440, &event.date));
        assert_eq!(reminder.type_label, "1 day before");
        assert_eq!(reminder.notification_id.as_deref(), Some("legacy-1"));
        assert!(reminder.enabled);
    }

    #[test]
    fn unaligned_reminder_gets_a_handle_derived_id() {
        let now = at("2030-06-01T12:00:00Z");
        let event = Event::new("evt-1", "Wedding", at("2030-06-10T15:00:00Z"), now);
        let notification = legacy_notification(
            "legacy-2",
            NotificationTrigger::Date { at: at("2030-06-11T15:00:00Z") },
            "Hope it went well",
        );

        let reminder = synthesize_reminder(&event, &notification, &now).unwrap();
        assert_eq!(reminder.id, recurrence::generate_recovered_reminder_id("evt-1", "legacy-2"));
        assert_eq!(reminder.type_label, "Reminder");
        assert_eq!(reminder.offset_minutes, 0);
    }
}
