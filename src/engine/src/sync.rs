//! Scheduler reconciliation: converge the OS notification queue on the desired reminders
//!
//! Key behavior:
//! - The scheduler's own listing is the only truth for what is live; cached handles are hints
//! - Tagged handles whose reminder is not desired are cancelled
//! - Untagged handles (foreign or legacy) are never touched
//! - Several handles for one reminder collapse to one, preferring the cached handle
//! - Desired reminders with no live handle are scheduled if they fire after the lead buffer
//! - Each cancel/schedule stands alone; failures are collected, never fatal

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::notifications::{self, call_once_on_timeout, call_with_retry, NotificationScheduler};
use crate::types::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

fn failure(op: SyncOp, reminder_id: Option<&str>, handle_id: Option<&str>, err: &EngineError) -> SyncFailure {
    SyncFailure {
        op,
        reminder_id: reminder_id.map(str::to_string),
        handle_id: handle_id.map(str::to_string),
        message: err.to_string(),
    }
}

/// Reconcile scheduled notifications with the enabled reminders on `events`.
///
/// Handles returned by the scheduler are recorded on the reminders; handles that are
/// no longer live are cleared. Running it twice with nothing changed makes no calls
/// on the second run beyond permission and listing.
pub async fn sync_scheduled_reminders(
    events: &mut [Event],
    scheduler: &dyn NotificationScheduler,
    clock: &dyn Clock,
    config: &EngineConfig,
) -> SyncReport {
    let mut report = SyncReport::default();

    match call_with_retry(config, "request_permission", || scheduler.request_permission()).await {
        Ok(PermissionStatus::Granted) => {}
        Ok(PermissionStatus::Denied) => {
            debug!("notification permission denied, skipping sync");
            report.permission_denied = true;
            return report;
        }
        Err(err) => {
            warn!(error = %err, "permission request failed, skipping sync");
            report.errors.push(failure(SyncOp::Permission, None, None, &err));
            return report;
        }
    }

    let live = match call_with_retry(config, "list", || scheduler.list_all_scheduled_notifications()).await {
        Ok(live) => live,
        Err(err) => {
            warn!(error = %err, "could not list scheduled notifications, skipping sync");
            report.errors.push(failure(SyncOp::List, None, None, &err));
            return report;
        }
    };

    // Enabled reminder id -> cached handle
    let desired: HashMap<&str, Option<&str>> = events
        .iter()
        .flat_map(|event| event.reminders.iter())
        .filter(|reminder| reminder.enabled)
        .map(|reminder| (reminder.id.as_str(), reminder.notification_id.as_deref()))
        .collect();

    let mut live_by_reminder: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for notification in &live {
        if let Some((_, reminder_id)) = notification.tag() {
            live_by_reminder
                .entry(reminder_id)
                .or_default()
                .push(notification.handle_id.as_str());
        }
    }

    let mut kept: HashMap<String, String> = HashMap::new();
    let mut to_cancel: Vec<(String, String)> = Vec::new();
    for (reminder_id, handles) in &live_by_reminder {
        match desired.get(reminder_id) {
            None => {
                to_cancel.extend(handles.iter().map(|handle| (reminder_id.to_string(), handle.to_string())));
            }
            Some(cached) => {
                let keep = cached
                    .filter(|cached| handles.contains(cached))
                    .unwrap_or(handles[0]);
                kept.insert(reminder_id.to_string(), keep.to_string());
                to_cancel.extend(
                    handles
                        .iter()
                        .filter(|handle| **handle != keep)
                        .map(|handle| (reminder_id.to_string(), handle.to_string())),
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Cancellation pass
    // ------------------------------------------------------------------------

    let mut gone: HashSet<String> = HashSet::new();
    for (reminder_id, handle) in to_cancel {
        let cancelled = call_with_retry(config, "cancel", || scheduler.cancel_scheduled_notification(&handle)).await;
        match cancelled {
            Ok(()) => {
                debug!(reminder_id = %reminder_id, handle = %handle, "cancelled stale notification");
                report.cancelled += 1;
                gone.insert(handle);
            }
            Err(err) => {
                warn!(reminder_id = %reminder_id, handle = %handle, error = %err, "cancel failed");
                report
                    .errors
                    .push(failure(SyncOp::Cancel, Some(&reminder_id), Some(&handle), &err));
            }
        }
    }

    let live_handles: HashSet<String> = live
        .iter()
        .map(|notification| notification.handle_id.clone())
        .filter(|handle| !gone.contains(handle))
        .collect();

    for reminder in events.iter_mut().flat_map(|event| event.reminders.iter_mut()) {
        let stale = matches!(&reminder.notification_id, Some(handle) if !live_handles.contains(handle));
        if stale {
            reminder.notification_id = None;
        }
    }

    // ------------------------------------------------------------------------
    // Scheduling pass
    // ------------------------------------------------------------------------

    let now = clock.now_fixed();
    let earliest = now + config.min_schedule_lead();

    for event_idx in 0..events.len() {
        for reminder_idx in 0..events[event_idx].reminders.len() {
            let reminder = &events[event_idx].reminders[reminder_idx];
            if !reminder.enabled || reminder.notification_id.is_some() {
                continue;
            }

            if let Some(handle) = kept.get(&reminder.id) {
                events[event_idx].reminders[reminder_idx].notification_id = Some(handle.clone());
                continue;
            }

            if reminder.fire_at <= earliest {
                debug!(reminder_id = %reminder.id, fire_at = %reminder.fire_at, "too close to fire, not scheduling");
                report.skipped += 1;
                continue;
            }

            let content = notifications::notification_content(&events[event_idx], reminder);
            let fire_in_seconds = (reminder.fire_at - now).num_seconds();
            let reminder_id = reminder.id.clone();

            // A timed-out schedule may still have landed; the next sync adopts it by tag
            let scheduled = call_once_on_timeout(config, "schedule", || {
                scheduler.schedule_notification(content.clone(), fire_in_seconds)
            })
            .await;

            match scheduled {
                Ok(handle) => {
                    debug!(reminder_id = %reminder_id, handle = %handle, fire_in_seconds, "scheduled reminder");
                    events[event_idx].reminders[reminder_idx].notification_id = Some(handle);
                    report.scheduled += 1;
                }
                Err(err) => {
                    warn!(reminder_id = %reminder_id, error = %err, "schedule failed");
                    report
                        .errors
                        .push(failure(SyncOp::Schedule, Some(&reminder_id), None, &err));
                }
            }
        }
    }

    info!(
        scheduled = report.scheduled,
        cancelled = report.cancelled,
        skipped = report.skipped,
        errors = report.errors.len(),
        "reminder sync finished"
    );
    report
}
