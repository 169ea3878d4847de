//! Reminder plan resolution
//!
//! Key behavior:
//! - A disabled plan or the `off` preset resolves to `off`
//! - Pro presets silently downgrade to `simple` (never `off`) without the entitlement
//! - Expansion into offsets happens only after resolution

use crate::types::*;
use tracing::debug;

/// Minutes before the occurrence, `0` meaning at the occurrence itself
const SIMPLE_OFFSETS: &[i64] = &[0];
const STANDARD_OFFSETS: &[i64] = &[1440, 0];
const INTENSE_OFFSETS: &[i64] = &[10080, 1440, 60, 0];

pub fn offsets_for_preset(preset: ReminderPreset) -> &'static [i64] {
    match preset {
        ReminderPreset::Off => &[],
        ReminderPreset::Simple => SIMPLE_OFFSETS,
        ReminderPreset::Standard => STANDARD_OFFSETS,
        ReminderPreset::Intense => INTENSE_OFFSETS,
    }
}

/// The preset that actually applies for this plan and entitlement
pub fn resolve_plan(plan: &ReminderPlan, is_entitled: bool) -> ReminderPreset {
    if !plan.enabled || plan.preset == ReminderPreset::Off {
        return ReminderPreset::Off;
    }
    if plan.preset.requires_pro() && !is_entitled {
        debug!(preset = ?plan.preset, "downgrading reminder plan without Pro entitlement");
        return ReminderPreset::Simple;
    }
    plan.preset
}

/// Plan for events persisted before plans existed.
/// A legacy preset id naming a tier wins; otherwise one reminder at start.
pub fn infer_default_plan(reminder_preset_id: Option<&str>, timezone: &str) -> ReminderPlan {
    let preset = reminder_preset_id
        .and_then(ReminderPreset::parse)
        .unwrap_or(ReminderPreset::Simple);
    ReminderPlan {
        preset,
        timezone: timezone.to_string(),
        enabled: preset != ReminderPreset::Off,
    }
}
