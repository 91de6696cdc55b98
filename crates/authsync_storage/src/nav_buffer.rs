#![forbid(unsafe_code)]

use authsync_contracts::navigation::NavigationEvent;
use authsync_contracts::Validate;

use crate::scope::{KeyValueStore, StorageError};

pub const NAV_BUFFER_KEY: &str = "authsync:nav:ring";

/// Session-scoped persistence for the navigation ring buffer. Another tab
/// may write between our read and our write, so `save` always re-reads the
/// current stored state and merges by timestamp instead of overwriting from
/// a stale in-memory copy.
#[derive(Debug, Clone)]
pub struct NavBufferStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> NavBufferStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the persisted buffer; unavailable or corrupt storage yields an
    /// empty buffer (corrupt payloads are evicted).
    pub fn load(&mut self) -> Vec<NavigationEvent> {
        let payload = match self.store.read(NAV_BUFFER_KEY) {
            Ok(Some(payload)) => payload,
            _ => return Vec::new(),
        };
        match serde_json::from_str::<Vec<NavigationEvent>>(&payload) {
            Ok(events) if events.iter().all(|e| e.validate().is_ok()) => events,
            _ => {
                let _ = self.store.remove(NAV_BUFFER_KEY);
                Vec::new()
            }
        }
    }

    /// Merge `events` with whatever is currently stored, order by timestamp
    /// (stable for equal stamps), keep the newest `window` entries, write.
    pub fn save(&mut self, events: &[NavigationEvent], window: usize) -> Result<(), StorageError> {
        let mut merged = self.load();
        for event in events {
            if !merged.contains(event) {
                merged.push(event.clone());
            }
        }
        merged.sort_by_key(|e| e.timestamp);
        if merged.len() > window {
            let excess = merged.len() - window;
            merged.drain(..excess);
        }
        let payload = serde_json::to_string(&merged).map_err(|_| StorageError::Corrupt {
            key: NAV_BUFFER_KEY.to_string(),
        })?;
        self.store.write(NAV_BUFFER_KEY, &payload)
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.store.remove(NAV_BUFFER_KEY)
    }
}
