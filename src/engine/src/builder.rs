//! Reminder instance builder
//!
//! Turns (occurrence, plan, entitlement, now) into concrete reminders.
//! Pure and deterministic: the same inputs always give the same ids,
//! fire times and labels, which is what the reconciler diffs on.

use crate::plan;
use crate::recurrence;
use crate::types::*;

/// "1 day", "3 hours", "10 minutes"
pub fn duration_phrase(offset_minutes: i64) -> String {
    let (count, unit) = if offset_minutes < 60 {
        (offset_minutes, "minute")
    } else if offset_minutes < 1440 {
        (offset_minutes / 60, "hour")
    } else {
        (offset_minutes / 1440, "day")
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{} {}{}", count, unit, plural)
}

pub fn type_label(offset_minutes: i64) -> String {
    if offset_minutes == 0 {
        return "At start".to_string();
    }
    format!("{} before", duration_phrase(offset_minutes))
}

/// Build the reminders for an event's current occurrence, future-only and sorted
pub fn build_reminders_for_event(event: &Event, is_entitled: bool, now: &Timestamp) -> Vec<ReminderInstance> {
    let occurrence = event.occurrence();
    if occurrence <= *now {
        return Vec::new();
    }

    let preset = plan::resolve_plan(&event.reminder_plan, is_entitled);

    let mut reminders: Vec<ReminderInstance> = plan::offsets_for_preset(preset)
        .iter()
        .filter_map(|&offset| {
            let fire_at = occurrence.checked_sub_signed(chrono::Duration::try_minutes(offset)?)?;
            if fire_at <= *now {
                return None;
            }
            Some(ReminderInstance {
                id: recurrence::generate_reminder_id(&event.id, offset, &occurrence),
                event_id: event.id.clone(),
                fire_at,
                type_label: type_label(offset),
                enabled: true,
                notification_id: None,
                offset_minutes: offset,
            })
        })
        .collect();

    reminders.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
    reminders
}

/// A reminder recovery adopted from an untagged legacy notification that matched
/// no plan offset. Its id is derived from the handle it was adopted with.
fn is_adopted_legacy(event: &Event, reminder: &ReminderInstance) -> bool {
    matches!(
        &reminder.notification_id,
        Some(handle) if reminder.id == recurrence::generate_recovered_reminder_id(&event.id, handle)
    )
}

/// Rebuild wholesale, then carry cached state across for ids that survived:
/// the scheduler handle always, the per-reminder toggle only for Pro users.
/// Adopted legacy reminders are kept as they are until they fire.
pub fn rebuild_event_reminders(event: &Event, is_entitled: bool, now: &Timestamp) -> Vec<ReminderInstance> {
    let mut fresh = build_reminders_for_event(event, is_entitled, now);
    for reminder in fresh.iter_mut() {
        if let Some(previous) = event.reminders.iter().find(|prev| prev.id == reminder.id) {
            reminder.notification_id = previous.notification_id.clone();
            if is_entitled {
                reminder.enabled = previous.enabled;
            }
        }
    }

    let adopted: Vec<ReminderInstance> = event
        .reminders
        .iter()
        .filter(|prev| prev.fire_at > *now && is_adopted_legacy(event, prev))
        .cloned()
        .collect();
    if !adopted.is_empty() {
        fresh.extend(adopted);
        fresh.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
    }
    fresh
}
