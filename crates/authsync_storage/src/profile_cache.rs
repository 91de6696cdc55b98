#![forbid(unsafe_code)]

use sha2::{Digest, Sha256};

use authsync_contracts::profile::CacheEntry;
use authsync_contracts::session::SubjectId;
use authsync_contracts::{ms_to_ns, MonotonicTimeNs, Validate};

use crate::scope::{KeyValueStore, StorageError};

pub const CACHE_KEY_PREFIX: &str = "authsync:profile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileCacheConfig {
    pub max_age_ms: u32,
}

impl ProfileCacheConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_age_ms: 3_600_000,
        }
    }

    pub fn max_age_ns(&self) -> u64 {
        ms_to_ns(self.max_age_ms)
    }
}

/// Bounded, time-expiring profile snapshot store. Storage failures are
/// reported but the read path degrades to a miss; the caller must never
/// become unusable because client storage is.
#[derive(Debug, Clone)]
pub struct ProfileCache<S: KeyValueStore> {
    config: ProfileCacheConfig,
    store: S,
}

impl<S: KeyValueStore> ProfileCache<S> {
    pub fn new(config: ProfileCacheConfig, store: S) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Key namespacing: fixed application prefix plus a digest of the
    /// subject id, so raw identifiers never appear as storage keys.
    fn key_for(subject_id: &SubjectId) -> String {
        let digest = Sha256::digest(subject_id.as_str().as_bytes());
        let mut hex = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            hex.push_str(&format!("{byte:02x}"));
        }
        format!("{CACHE_KEY_PREFIX}:{hex}")
    }

    pub fn write(&mut self, entry: &CacheEntry) -> Result<(), StorageError> {
        entry.validate()?;
        let subject_id = SubjectId::new(entry.subject_id.clone())?;
        let payload = serde_json::to_string(entry).map_err(|_| StorageError::Corrupt {
            key: Self::key_for(&subject_id),
        })?;
        self.store.write(&Self::key_for(&subject_id), &payload)
    }

    /// Returns the entry only while `now - cached_at < max_age`. A stale or
    /// corrupt entry is evicted and treated as a miss, as is any storage
    /// read failure.
    pub fn read(&mut self, subject_id: &SubjectId, now: MonotonicTimeNs) -> Option<CacheEntry> {
        let key = Self::key_for(subject_id);
        let payload = match self.store.read(&key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(_) => return None,
        };
        let entry: CacheEntry = match serde_json::from_str(&payload) {
            Ok(entry) => entry,
            Err(_) => {
                let _ = self.store.remove(&key);
                return None;
            }
        };
        if entry.validate().is_err() || entry.subject_id != subject_id.as_str() {
            let _ = self.store.remove(&key);
            return None;
        }
        if now.saturating_since(entry.cached_at) >= self.config.max_age_ns() {
            let _ = self.store.remove(&key);
            return None;
        }
        Some(entry)
    }

    pub fn clear(&mut self, subject_id: &SubjectId) -> Result<(), StorageError> {
        self.store.remove(&Self::key_for(subject_id))
    }
}
