//! Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use countdown_engine::storage::{KeyValueStore, StableStore};
use countdown_engine::{
    Clock, EngineConfig, EngineError, EngineResult, ManualClock, NotificationContent, NotificationData,
    NotificationScheduler, NotificationTrigger, PermissionStatus, ScheduledNotification, Timestamp,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

pub const NOW: &str = "2030-06-01T12:00:00Z";

pub fn at(value: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(value).unwrap()
}

pub fn clock() -> Rc<ManualClock> {
    Rc::new(ManualClock::new(at(NOW).with_timezone(&Utc)))
}

/// Defaults, minus retries so failure tests don't sleep
pub fn test_config() -> EngineConfig {
    EngineConfig {
        scheduler_retries: 0,
        ..EngineConfig::default()
    }
}

// ============================================================================
// Fake OS notification queue
// ============================================================================

pub struct FakeScheduler {
    clock: Rc<ManualClock>,
    live: RefCell<Vec<ScheduledNotification>>,
    next_handle: Cell<u32>,
    permission: Cell<PermissionStatus>,
    failing_reminders: RefCell<HashSet<String>>,
    failing_handles: RefCell<HashSet<String>>,
    failing_list: Cell<bool>,
    hang_after_schedule: Cell<bool>,
    pub schedule_calls: Cell<usize>,
    pub cancel_calls: Cell<usize>,
}

impl FakeScheduler {
    pub fn new(clock: Rc<ManualClock>) -> Self {
        Self {
            clock,
            live: RefCell::new(Vec::new()),
            next_handle: Cell::new(1),
            permission: Cell::new(PermissionStatus::Granted),
            failing_reminders: RefCell::new(HashSet::new()),
            failing_handles: RefCell::new(HashSet::new()),
            failing_list: Cell::new(false),
            hang_after_schedule: Cell::new(false),
            schedule_calls: Cell::new(0),
            cancel_calls: Cell::new(0),
        }
    }

    pub fn deny_permission(&self) {
        self.permission.set(PermissionStatus::Denied);
    }

    pub fn fail_schedule_for(&self, reminder_id: &str) {
        self.failing_reminders.borrow_mut().insert(reminder_id.to_string());
    }

    pub fn fail_cancel_for(&self, handle_id: &str) {
        self.failing_handles.borrow_mut().insert(handle_id.to_string());
    }

    pub fn fail_listing(&self, failing: bool) {
        self.failing_list.set(failing);
    }

    /// Accept schedule requests but never return from the call
    pub fn hang_after_schedule(&self, hanging: bool) {
        self.hang_after_schedule.set(hanging);
    }

    /// Put a notification on the queue as if someone else had scheduled it
    pub fn insert(&self, handle_id: &str, content: NotificationContent, trigger: NotificationTrigger) {
        self.live.borrow_mut().push(ScheduledNotification {
            handle_id: handle_id.to_string(),
            content,
            trigger,
        });
    }

    pub fn insert_untagged(&self, handle_id: &str, body: &str, fire_at: &str) {
        self.insert(
            handle_id,
            NotificationContent {
                title: "Countdown".to_string(),
                body: body.to_string(),
                data: NotificationData::default(),
            },
            NotificationTrigger::Date { at: at(fire_at) },
        );
    }

    pub fn insert_tagged(&self, handle_id: &str, event_id: &str, reminder_id: &str, fire_at: &str) {
        self.insert(
            handle_id,
            NotificationContent {
                title: "Countdown".to_string(),
                body: "Reminder".to_string(),
                data: NotificationData {
                    event_id: Some(event_id.to_string()),
                    reminder_id: Some(reminder_id.to_string()),
                },
            },
            NotificationTrigger::Date { at: at(fire_at) },
        );
    }

    pub fn live(&self) -> Vec<ScheduledNotification> {
        self.live.borrow().clone()
    }

    pub fn handles(&self) -> BTreeSet<String> {
        self.live.borrow().iter().map(|n| n.handle_id.clone()).collect()
    }

    /// Reminder ids of every tagged notification, duplicates included
    pub fn tagged_reminder_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .live
            .borrow()
            .iter()
            .filter_map(|n| n.tag().map(|(_, reminder_id)| reminder_id.to_string()))
            .collect();
        ids.sort();
        ids
    }

    pub fn reset_calls(&self) {
        self.schedule_calls.set(0);
        self.cancel_calls.set(0);
    }
}

#[async_trait(?Send)]
impl NotificationScheduler for FakeScheduler {
    async fn schedule_notification(&self, content: NotificationContent, fire_in_seconds: i64) -> EngineResult<String> {
        self.schedule_calls.set(self.schedule_calls.get() + 1);
        if let Some(reminder_id) = &content.data.reminder_id {
            if self.failing_reminders.borrow().contains(reminder_id) {
                return Err(EngineError::Scheduler(format!("refused {}", reminder_id)));
            }
        }

        let handle_id = format!("os-{}", self.next_handle.get());
        self.next_handle.set(self.next_handle.get() + 1);
        let fire_at = self.clock.now_fixed() + chrono::Duration::seconds(fire_in_seconds);
        self.insert(&handle_id, content, NotificationTrigger::Date { at: fire_at });
        if self.hang_after_schedule.get() {
            std::future::pending::<()>().await;
        }
        Ok(handle_id)
    }

    async fn cancel_scheduled_notification(&self, handle_id: &str) -> EngineResult<()> {
        self.cancel_calls.set(self.cancel_calls.get() + 1);
        if self.failing_handles.borrow().contains(handle_id) {
            return Err(EngineError::Scheduler(format!("cannot cancel {}", handle_id)));
        }
        self.live.borrow_mut().retain(|n| n.handle_id != handle_id);
        Ok(())
    }

    async fn list_all_scheduled_notifications(&self) -> EngineResult<Vec<ScheduledNotification>> {
        if self.failing_list.get() {
            return Err(EngineError::Scheduler("queue unavailable".to_string()));
        }
        Ok(self.live())
    }

    async fn request_permission(&self) -> EngineResult<PermissionStatus> {
        Ok(self.permission.get())
    }
}

// ============================================================================
// Store whose writes can be made to fail per key
// ============================================================================

#[derive(Default)]
pub struct FlakyStore {
    pub inner: StableStore,
    failing_writes: RefCell<HashSet<String>>,
}

impl FlakyStore {
    pub fn fail_writes_to(&self, key: &str) {
        self.failing_writes.borrow_mut().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_writes.borrow_mut().clear();
    }
}

#[async_trait(?Send)]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        if self.failing_writes.borrow().contains(key) {
            return Err(EngineError::Storage(format!("write to {} failed", key)));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> EngineResult<()> {
        self.inner.remove(key).await
    }

    async fn list_keys(&self) -> EngineResult<Vec<String>> {
        self.inner.list_keys().await
    }
}
