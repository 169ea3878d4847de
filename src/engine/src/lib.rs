//! Countdown Engine - reminder scheduling and recurrence core
//!
//! Keeps a countdown app's reminders in step with the device notification queue.
//! Persisted events flow through roll-forward, plan resolution and instance building,
//! then get reconciled against the OS scheduler and written back.
//! Collaborators (storage, scheduler, entitlement, clock) are injected through
//! `ReminderEngine`, which also carries the lifecycle state.

pub mod builder;
pub mod clock;
pub mod config;
pub mod entitlement;
pub mod migration;
pub mod notifications;
pub mod plan;
pub mod recovery;
pub mod recurrence;
pub mod storage;
pub mod sync;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, StorageKeys};
pub use entitlement::{EntitlementProvider, StaticEntitlement};
pub use notifications::NotificationScheduler;
pub use storage::{KeyValueStore, StableStore};
pub use types::*;

use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info};

pub struct ReminderEngine {
    store: Rc<dyn KeyValueStore>,
    scheduler: Rc<dyn NotificationScheduler>,
    entitlement: Rc<dyn EntitlementProvider>,
    clock: Rc<dyn Clock>,
    config: EngineConfig,
    initialized: Cell<bool>,
    last_sync_at: Cell<Option<DateTime<Utc>>>,
}

impl ReminderEngine {
    pub fn new(
        store: Rc<dyn KeyValueStore>,
        scheduler: Rc<dyn NotificationScheduler>,
        entitlement: Rc<dyn EntitlementProvider>,
        clock: Rc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            entitlement,
            clock,
            config,
            initialized: Cell::new(false),
            last_sync_at: Cell::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at.get()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Startup repair: migrate the stored collection, then recover legacy
    /// notifications. Returns `None` when this engine already ran it.
    pub async fn init(&self) -> Option<StartupReport> {
        if self.initialized.get() {
            return None;
        }

        let is_entitled = self.entitlement.is_pro().await;
        let migration = migration::migrate_events(&*self.store, &*self.clock, &self.config, is_entitled).await;
        let recovery =
            recovery::recover_legacy_notifications(&*self.store, &*self.scheduler, &*self.clock, &self.config).await;

        self.initialized.set(true);
        info!(migration = ?migration, recovered = recovery.recovered, "reminder engine initialized");
        Some(StartupReport { migration, recovery })
    }

    /// Roll forward, rebuild reminders, reconcile with the scheduler, and persist
    /// if anything changed. Call on app start and whenever the app regains focus.
    pub async fn refresh(&self) -> EngineResult<SyncReport> {
        let events = self.events().await?;
        self.reconcile(events).await
    }

    /// Entitlement changes re-resolve every plan
    pub async fn on_entitlement_changed(&self) -> EngineResult<SyncReport> {
        self.refresh().await
    }

    // ========================================================================
    // Event Editing
    // ========================================================================

    pub async fn events(&self) -> EngineResult<Vec<Event>> {
        storage::load_events(&*self.store, &self.config.keys).await
    }

    /// Create or replace an event, then reconcile its reminders
    pub async fn save_event(&self, mut event: Event) -> EngineResult<SyncReport> {
        if event.id.trim().is_empty() {
            return Err(EngineError::Validation("event id is required".to_string()));
        }

        let is_entitled = self.entitlement.is_pro().await;
        event.notes = entitlement::cap_notes(&event.notes, entitlement::notes_limit(&self.config, is_entitled));

        let mut events = self.events().await?;
        match events.iter_mut().find(|existing| existing.id == event.id) {
            Some(existing) => {
                event.created_at = existing.created_at;
                if event.date != existing.date {
                    // A new base time restarts the recurrence
                    event.next_occurrence_at = Some(event.date);
                    event.original_date_at = None;
                } else {
                    event.next_occurrence_at = existing.next_occurrence_at;
                    event.original_date_at = existing.original_date_at;
                }
                event.reminders = existing.reminders.clone();
                *existing = event;
            }
            None => {
                if event.next_occurrence_at.is_none() {
                    event.next_occurrence_at = Some(event.date);
                }
                events.push(event);
            }
        }

        self.persist_and_reconcile(events).await
    }

    /// Remove an event; its notifications are cancelled by the sync that follows
    pub async fn delete_event(&self, event_id: &str) -> EngineResult<SyncReport> {
        let mut events = self.events().await?;
        let before = events.len();
        events.retain(|event| event.id != event_id);
        if events.len() == before {
            return Err(EngineError::not_found("event", event_id));
        }

        self.persist_and_reconcile(events).await
    }

    /// Turn a single reminder on or off (Pro only)
    pub async fn set_reminder_enabled(&self, event_id: &str, reminder_id: &str, enabled: bool) -> EngineResult<SyncReport> {
        entitlement::require_feature(&*self.entitlement, entitlement::FEATURE_REMINDER_TOGGLES).await?;

        let mut events = self.events().await?;
        let event = events
            .iter_mut()
            .find(|event| event.id == event_id)
            .ok_or_else(|| EngineError::not_found("event", event_id))?;
        let reminder = event
            .reminders
            .iter_mut()
            .find(|reminder| reminder.id == reminder_id)
            .ok_or_else(|| EngineError::not_found("reminder", reminder_id))?;
        reminder.enabled = enabled;

        self.persist_and_reconcile(events).await
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    async fn persist_and_reconcile(&self, events: Vec<Event>) -> EngineResult<SyncReport> {
        storage::save_events(&*self.store, &self.config.keys, &events).await?;
        self.reconcile(events).await
    }

    async fn reconcile(&self, mut events: Vec<Event>) -> EngineResult<SyncReport> {
        let before = events.clone();
        let is_entitled = self.entitlement.is_pro().await;
        let now = self.clock.now_fixed();

        let rolled = recurrence::roll_forward_all(&mut events, &now, self.config.max_roll_forward_iterations);
        for event in events.iter_mut() {
            event.reminders = builder::rebuild_event_reminders(event, is_entitled, &now);
        }
        debug!(events = events.len(), rolled, "rebuilt reminders");

        let report = sync::sync_scheduled_reminders(&mut events, &*self.scheduler, &*self.clock, &self.config).await;
        self.last_sync_at.set(Some(self.clock.now()));

        if events != before {
            storage::save_events(&*self.store, &self.config.keys, &events).await?;
        }
        Ok(report)
    }
}
