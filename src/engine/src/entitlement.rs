//! Entitlement gating
//!
//! The billing subsystem owns purchases; this engine only asks whether a tier
//! or feature is unlocked.
//! - Pro unlocks the standard/intense reminder tiers (applied in `plan::resolve_plan`)
//! - Pro unlocks per-reminder toggles
//! - Notes are capped per tier

use crate::config::EngineConfig;
use crate::types::*;
use async_trait::async_trait;
use std::cell::Cell;

pub const FEATURE_REMINDER_TOGGLES: &str = "reminder_toggles";

#[async_trait(?Send)]
pub trait EntitlementProvider {
    async fn is_pro(&self) -> bool;

    async fn has_feature(&self, _name: &str) -> bool {
        self.is_pro().await
    }
}

/// Fixed entitlement, switchable at runtime
#[derive(Debug, Default)]
pub struct StaticEntitlement {
    pro: Cell<bool>,
}

impl StaticEntitlement {
    pub fn new(pro: bool) -> Self {
        Self { pro: Cell::new(pro) }
    }

    pub fn set_pro(&self, pro: bool) {
        self.pro.set(pro);
    }
}

#[async_trait(?Send)]
impl EntitlementProvider for StaticEntitlement {
    async fn is_pro(&self) -> bool {
        self.pro.get()
    }
}

/// Fail with `NotEntitled` unless the feature is unlocked
pub async fn require_feature(provider: &dyn EntitlementProvider, feature: &str) -> EngineResult<()> {
    if provider.has_feature(feature).await {
        Ok(())
    } else {
        Err(EngineError::NotEntitled(feature.to_string()))
    }
}

pub fn notes_limit(config: &EngineConfig, is_entitled: bool) -> usize {
    if is_entitled {
        config.pro_notes_limit
    } else {
        config.free_notes_limit
    }
}

/// Truncate to `limit` characters, never splitting a character
pub fn cap_notes(notes: &str, limit: usize) -> String {
    match notes.char_indices().nth(limit) {
        Some((cut, _)) => notes[..cut].to_string(),
        None => notes.to_string(),
    }
}
