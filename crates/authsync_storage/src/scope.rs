#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use authsync_contracts::ContractViolation;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    Unavailable { detail: &'static str },
    Corrupt { key: String },
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

/// String-keyed client storage scope. Two instances back the subsystem:
/// a longer-lived one for the profile cache and a session-lived one for
/// the navigation buffer.
pub trait KeyValueStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).read(key)
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).write(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    rows: BTreeMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.rows.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.rows.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.rows.remove(key);
        Ok(())
    }
}

/// Storage-disabled host (private browsing, quota exhaustion at open).
/// Every operation fails; callers above treat that as a cache miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableKeyValueStore;

impl KeyValueStore for UnavailableKeyValueStore {
    fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable {
            detail: "storage disabled",
        })
    }

    fn write(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable {
            detail: "storage disabled",
        })
    }

    fn remove(&mut self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable {
            detail: "storage disabled",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_and_removes() {
        let mut store = MemoryKeyValueStore::new();
        store.write("authsync:test:a", "1").unwrap();
        assert_eq!(store.read("authsync:test:a").unwrap().as_deref(), Some("1"));
        store.remove("authsync:test:a").unwrap();
        assert_eq!(store.read("authsync:test:a").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn unavailable_store_fails_every_operation() {
        let mut store = UnavailableKeyValueStore;
        assert!(store.read("k").is_err());
        assert!(store.write("k", "v").is_err());
        assert!(store.remove("k").is_err());
    }
}
