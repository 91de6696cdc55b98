#![forbid(unsafe_code)]

pub mod nav_buffer;
pub mod profile_cache;
pub mod scope;

pub use scope::{KeyValueStore, MemoryKeyValueStore, StorageError, UnavailableKeyValueStore};
