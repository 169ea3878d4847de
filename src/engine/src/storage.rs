//! Persistent key-value storage and the event collection document
//!
//! Memory Layout (for `StableStore`):
//! - Memory 0: key space (String -> String)
//!
//! The event collection is one JSON array stored under `keys.events`.
//! Reads and writes of that document are not coordinated with other writers.

use crate::config::StorageKeys;
use crate::types::*;
use async_trait::async_trait;
use ic_stable_structures::{
    memory_manager::{MemoryId, MemoryManager, VirtualMemory},
    DefaultMemoryImpl, StableBTreeMap,
};
use std::cell::RefCell;
use tracing::debug;

type Memory = VirtualMemory<DefaultMemoryImpl>;

const KV_MEM_ID: MemoryId = MemoryId::new(0);

#[async_trait(?Send)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> EngineResult<()>;
    async fn remove(&self, key: &str) -> EngineResult<()>;
    async fn list_keys(&self) -> EngineResult<Vec<String>>;
}

// ============================================================================
// Stable-structures backed store
// ============================================================================

/// Key-value store over a stable-structures BTreeMap.
/// Re-initialising on a clone of the same memory sees earlier writes.
pub struct StableStore {
    entries: RefCell<StableBTreeMap<String, String, Memory>>,
}

impl StableStore {
    pub fn new() -> Self {
        Self::init(DefaultMemoryImpl::default())
    }

    pub fn init(memory: DefaultMemoryImpl) -> Self {
        let manager = MemoryManager::init(memory);
        Self {
            entries: RefCell::new(StableBTreeMap::init(manager.get(KV_MEM_ID))),
        }
    }
}

impl Default for StableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl KeyValueStore for StableStore {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.entries.borrow().get(&key.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> EngineResult<()> {
        self.entries.borrow_mut().remove(&key.to_string());
        Ok(())
    }

    async fn list_keys(&self) -> EngineResult<Vec<String>> {
        Ok(self.entries.borrow().iter().map(|(k, _)| k).collect())
    }
}

// ============================================================================
// Event Collection
// ============================================================================

/// Load the event collection; an absent or blank document is an empty collection
pub async fn load_events(store: &dyn KeyValueStore, keys: &StorageKeys) -> EngineResult<Vec<Event>> {
    match store.get(&keys.events).await? {
        Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
        _ => Ok(Vec::new()),
    }
}

pub async fn save_events(store: &dyn KeyValueStore, keys: &StorageKeys, events: &[Event]) -> EngineResult<()> {
    let raw = serde_json::to_string(events)?;
    store.set(&keys.events, &raw).await?;
    debug!(count = events.len(), "persisted event collection");
    Ok(())
}
