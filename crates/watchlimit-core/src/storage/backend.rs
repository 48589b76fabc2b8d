//! Raw key/value backends.
//!
//! Backends deal in JSON values only; typing, locking and change
//! notification live in [`super::Store`].

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::StorageError;

/// A flat key/value document.
pub trait KvBackend: Send + Sync {
    /// Fetch the given keys. Absent keys are simply missing from the map.
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError>;

    /// Write all entries at once.
    fn set(&self, entries: &[(&str, Value)]) -> Result<(), StorageError>;
}

/// In-process backend, used by tests and as a scratch store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: Mutex<HashMap<String, Value>>,
    invalidated: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call after this fails with `StorageError::Unavailable`, the way
    /// an extension context does after it is torn down.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("context invalidated".into()));
        }
        Ok(())
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        self.check()?;
        let map = self
            .map
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".into()))?;
        Ok(keys
            .iter()
            .filter_map(|k| map.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&self, entries: &[(&str, Value)]) -> Result<(), StorageError> {
        self.check()?;
        let mut map = self
            .map
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".into()))?;
        for (key, value) in entries {
            map.insert(key.to_string(), value.clone());
        }
        Ok(())
    }
}

impl<T: KvBackend + ?Sized> KvBackend for std::sync::Arc<T> {
    fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        (**self).get(keys)
    }

    fn set(&self, entries: &[(&str, Value)]) -> Result<(), StorageError> {
        (**self).set(entries)
    }
}
