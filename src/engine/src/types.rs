//! Core types for the countdown reminder engine
//! All instants are ISO-8601 strings on disk and `DateTime<FixedOffset>` in memory,
//! so calendar arithmetic happens in the offset the instant was written in.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Timestamp = DateTime<FixedOffset>;

// ============================================================================
// Enums
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Recurrence {
    /// Lenient parse for persisted data; anything unrecognised is `None`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Recurrence::Daily,
            "weekly" => Recurrence::Weekly,
            "monthly" => Recurrence::Monthly,
            "yearly" => Recurrence::Yearly,
            _ => Recurrence::None,
        }
    }

    pub fn is_recurring(self) -> bool {
        self != Recurrence::None
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReminderPreset {
    Off,
    #[default]
    Simple,
    Standard,
    Intense,
}

impl ReminderPreset {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(ReminderPreset::Off),
            "simple" => Some(ReminderPreset::Simple),
            "standard" => Some(ReminderPreset::Standard),
            "intense" => Some(ReminderPreset::Intense),
            _ => None,
        }
    }

    /// Standard and intense are Pro tiers
    pub fn requires_pro(self) -> bool {
        matches!(self, ReminderPreset::Standard | ReminderPreset::Intense)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

// ============================================================================
// Structs
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPlan {
    pub preset: ReminderPreset,
    pub timezone: String,
    pub enabled: bool,
}

impl ReminderPlan {
    pub fn new(preset: ReminderPreset, timezone: impl Into<String>) -> Self {
        Self {
            preset,
            timezone: timezone.into(),
            enabled: true,
        }
    }
}

impl Default for ReminderPlan {
    fn default() -> Self {
        Self::new(ReminderPreset::Simple, "UTC")
    }
}

/// One concrete reminder derived from a plan and an occurrence.
/// Cached on the event, never a source of truth.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderInstance {
    pub id: String,
    pub event_id: String,
    #[serde(rename = "fireAtISO")]
    pub fire_at: Timestamp,
    pub type_label: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub offset_minutes: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub date: Timestamp,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_occurrence_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_date_at: Option<Timestamp>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub reminder_preset_id: Option<String>,
    #[serde(default)]
    pub reminder_plan: ReminderPlan,
    #[serde(default)]
    pub reminders: Vec<ReminderInstance>,
    /// Single notification handle stored by builds that predate `reminders`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    pub created_at: Timestamp,
}

impl Event {
    pub fn new(id: impl Into<String>, name: impl Into<String>, date: Timestamp, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: String::new(),
            date,
            notes: String::new(),
            recurrence: Recurrence::None,
            next_occurrence_at: Some(date),
            original_date_at: None,
            template_id: None,
            reminder_preset_id: None,
            reminder_plan: ReminderPlan::default(),
            reminders: Vec::new(),
            notification_id: None,
            created_at,
        }
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn with_plan(mut self, plan: ReminderPlan) -> Self {
        self.reminder_plan = plan;
        self
    }

    /// The occurrence reminders are built against: the tracked next occurrence, else `date`.
    pub fn occurrence(&self) -> Timestamp {
        self.next_occurrence_at.unwrap_or(self.date)
    }
}

// ============================================================================
// Notification Scheduler Shapes
// ============================================================================

/// Metadata attached to every notification this engine schedules.
/// Foreign or legacy notifications may carry neither field.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub reminder_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: NotificationData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationTrigger {
    Date { at: Timestamp },
    TimeInterval { seconds: i64 },
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub handle_id: String,
    pub content: NotificationContent,
    pub trigger: NotificationTrigger,
}

impl ScheduledNotification {
    /// `(event_id, reminder_id)` when the notification was created by this engine.
    pub fn tag(&self) -> Option<(&str, &str)> {
        match (&self.content.data.event_id, &self.content.data.reminder_id) {
            (Some(event_id), Some(reminder_id)) => Some((event_id, reminder_id)),
            _ => None,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOp {
    Permission,
    List,
    Cancel,
    Schedule,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFailure {
    pub op: SyncOp,
    pub reminder_id: Option<String>,
    pub handle_id: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub scheduled: usize,
    pub cancelled: usize,
    /// Desired reminders too close to fire to be handed to the scheduler
    pub skipped: usize,
    pub permission_denied: bool,
    pub errors: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.scheduled == 0 && self.cancelled == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyCurrent,
    NothingToMigrate,
    Migrated { events: usize, backup_key: String },
    Quarantined { quarantine_key: String },
    Aborted { reason: String, restored: bool },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// The persisted completion flag was already set
    pub already_completed: bool,
    pub recovered: usize,
    pub already_recorded: usize,
    pub unmatched: usize,
    /// Matched notifications whose trigger could not be turned into a fire time
    pub unrecoverable: usize,
    pub failed: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartupReport {
    pub migration: MigrationOutcome,
    pub recovery: RecoveryReport,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("scheduler call timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("requires Pro: {0}")]
    NotEntitled(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
