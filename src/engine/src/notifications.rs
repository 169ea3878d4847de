//! Notification scheduler boundary
//!
//! Strategy:
//! - The OS owns delivery; the engine only schedules, cancels and lists
//! - Every notification the engine creates carries `{eventId, reminderId}` metadata
//! - Every call crosses a bounded timeout with a small linear-backoff retry
//! - Scheduling is never re-issued after a timeout, since the OS may already hold it

use crate::builder;
use crate::config::EngineConfig;
use crate::types::*;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const RETRY_BACKOFF_MS: u64 = 50;

#[async_trait(?Send)]
pub trait NotificationScheduler {
    /// Schedule `content` to fire in `fire_in_seconds`; returns the scheduler's handle
    async fn schedule_notification(&self, content: NotificationContent, fire_in_seconds: i64) -> EngineResult<String>;
    async fn cancel_scheduled_notification(&self, handle_id: &str) -> EngineResult<()>;
    async fn list_all_scheduled_notifications(&self) -> EngineResult<Vec<ScheduledNotification>>;
    async fn request_permission(&self) -> EngineResult<PermissionStatus>;
}

/// Title and body for a reminder, tagged with its event and reminder ids
pub fn notification_content(event: &Event, reminder: &ReminderInstance) -> NotificationContent {
    let title = if event.icon.is_empty() {
        event.name.clone()
    } else {
        format!("{} {}", event.icon, event.name)
    };

    let body = if reminder.offset_minutes == 0 {
        format!("{} is starting now", event.name)
    } else {
        format!("{} starts in {}", event.name, builder::duration_phrase(reminder.offset_minutes))
    };

    NotificationContent {
        title,
        body,
        data: NotificationData {
            event_id: Some(event.id.clone()),
            reminder_id: Some(reminder.id.clone()),
        },
    }
}

/// Run a scheduler call under the configured timeout, retrying failures
pub(crate) async fn call_with_retry<T, F, Fut>(config: &EngineConfig, op: &'static str, call: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    retry_loop(config, op, true, call).await
}

/// Like `call_with_retry`, but a timeout is final. For calls that are not
/// idempotent: the scheduler may have acted before the timeout fired.
pub(crate) async fn call_once_on_timeout<T, F, Fut>(config: &EngineConfig, op: &'static str, call: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    retry_loop(config, op, false, call).await
}

async fn retry_loop<T, F, Fut>(config: &EngineConfig, op: &'static str, retry_timeouts: bool, mut call: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let timeout = config.scheduler_timeout();
    let mut attempt = 0u32;

    loop {
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(EngineError::Timeout(elapsed)) if !retry_timeouts => {
                debug!(op, attempt, "scheduler call timed out, not retrying");
                return Err(EngineError::Timeout(elapsed));
            }
            Err(err) if attempt < config.scheduler_retries => {
                attempt += 1;
                debug!(op, attempt, error = %err, "retrying scheduler call");
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
