//! Recurrence logic for rolling recurring events forward
//!
//! Key algorithm:
//! 1. Advance an occurrence by one calendar unit of its rule, clamping to month end
//! 2. Repeat from the tracked next occurrence until it lands after `now`
//! 3. Keep the first-ever occurrence in `original_date_at`
//! 4. Derive reminder ids from (event_id, offset, occurrence) so rebuilds are stable

use crate::types::*;
use chrono::{Datelike, Days, NaiveDate, TimeZone};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use tracing::{debug, warn};

/// Generate a deterministic reminder ID from the event, the offset and the occurrence it targets
pub fn generate_reminder_id(event_id: &str, offset_minutes: i64, occurrence: &Timestamp) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(offset_minutes.to_be_bytes());
    hasher.update(occurrence.timestamp().to_be_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// ID for a reminder reconstructed from a notification handle that carries no reminder id
pub fn generate_recovered_reminder_id(event_id: &str, handle_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(handle_id.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Shift by whole months in the instant's own offset, clamping the day to the target month.
/// Covers Jan 31 -> Feb 28/29 and Feb 29 -> Feb 28 on a non-leap year.
fn add_months_clamped(current: &Timestamp, months: u32) -> Option<Timestamp> {
    let local = current.naive_local();
    let total = local.year() * 12 + local.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = local.day().min(days_in_month(year, month));

    let shifted = NaiveDate::from_ymd_opt(year, month, day)?.and_time(local.time());
    current.offset().from_local_datetime(&shifted).single()
}

/// Next occurrence after `current`, or `None` when the rule does not recur
pub fn compute_next_occurrence(current: &Timestamp, rule: Recurrence) -> Option<Timestamp> {
    match rule {
        Recurrence::None => None,
        Recurrence::Daily => current.checked_add_days(Days::new(1)),
        Recurrence::Weekly => current.checked_add_days(Days::new(7)),
        Recurrence::Monthly => add_months_clamped(current, 1),
        Recurrence::Yearly => add_months_clamped(current, 12),
    }
}

/// Roll a recurring event past every elapsed occurrence.
///
/// Returns `Cow::Borrowed` when nothing moved, so callers can skip the write.
/// A rolled event keeps stale `reminders`; rebuild them afterwards.
pub fn roll_forward_if_needed<'a>(event: &'a Event, now: &Timestamp, max_iterations: u32) -> Cow<'a, Event> {
    if !event.recurrence.is_recurring() {
        return Cow::Borrowed(event);
    }

    let mut next = event.occurrence();
    let mut iterations = 0u32;

    while next <= *now {
        if iterations >= max_iterations {
            warn!(
                event_id = %event.id,
                iterations,
                next = %next,
                "roll-forward iteration bound reached, keeping furthest occurrence"
            );
            break;
        }
        match compute_next_occurrence(&next, event.recurrence) {
            Some(candidate) => {
                next = candidate;
                iterations += 1;
            }
            None => break,
        }
    }

    if iterations == 0 {
        return Cow::Borrowed(event);
    }

    debug!(event_id = %event.id, iterations, next = %next, "rolled event forward");

    let mut rolled = event.clone();
    rolled.next_occurrence_at = Some(next);
    rolled.original_date_at = Some(event.original_date_at.unwrap_or(event.date));
    Cow::Owned(rolled)
}

/// Roll every event forward in place. Returns how many events moved.
pub fn roll_forward_all(events: &mut [Event], now: &Timestamp, max_iterations: u32) -> usize {
    let mut moved = 0;
    for event in events.iter_mut() {
        let rolled = match roll_forward_if_needed(event, now, max_iterations) {
            Cow::Owned(rolled) => Some(rolled),
            Cow::Borrowed(_) => None,
        };
        if let Some(rolled) = rolled {
            *event = rolled;
            moved += 1;
        }
    }
    moved
}
