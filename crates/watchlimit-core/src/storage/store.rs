//! The single shared state store.
//!
//! Every component holds a clone of [`Store`] and re-reads through it; no
//! one caches collections. Read-modify-write sequences go through
//! [`Store::transact`], which holds a per-key async lock for the whole
//! sequence so two tabs cannot clobber each other's writes. Multi-key
//! transactions take their locks in `StateKey` order.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use super::backend::KvBackend;
use crate::error::StorageError;
use crate::model::{BankedEntry, Preferences, WatchedEntry};

/// Keys of the persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKey {
    Watched,
    Bank,
    LastResetDate,
    Enabled,
    DarkMode,
}

impl StateKey {
    pub const ALL: [StateKey; 5] = [
        StateKey::Watched,
        StateKey::Bank,
        StateKey::LastResetDate,
        StateKey::Enabled,
        StateKey::DarkMode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::Watched => "watchedVideosToday",
            StateKey::Bank => "videoBank",
            StateKey::LastResetDate => "lastResetDate",
            StateKey::Enabled => "extensionEnabled",
            StateKey::DarkMode => "darkMode",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Published after a write that actually changed at least one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub keys: Vec<StateKey>,
}

impl StateChange {
    pub fn touches(&self, key: StateKey) -> bool {
        self.keys.contains(&key)
    }
}

/// Values fetched for one transaction, plus the writes staged against them.
#[derive(Debug)]
pub struct Batch {
    values: BTreeMap<StateKey, Option<Value>>,
    staged: BTreeMap<StateKey, Value>,
}

impl Batch {
    /// Read a key, seeing values staged earlier in the same batch.
    ///
    /// Fails with `QueryFailed` if `key` was not part of the transaction's
    /// key set.
    pub fn get<T: DeserializeOwned>(&self, key: StateKey) -> Result<Option<T>, StorageError> {
        let raw = match self.staged.get(&key) {
            Some(v) => Some(v),
            None => self.values.get(&key).ok_or_else(|| not_locked(key))?.as_ref(),
        };
        raw.map(|v| {
            serde_json::from_value(v.clone()).map_err(|source| StorageError::Corrupt {
                key: key.as_str().to_string(),
                source,
            })
        })
        .transpose()
    }

    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: StateKey) -> Result<T, StorageError> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    pub fn put<T: Serialize>(&mut self, key: StateKey, value: &T) -> Result<(), StorageError> {
        if !self.values.contains_key(&key) {
            return Err(not_locked(key));
        }
        let value = serde_json::to_value(value).map_err(|source| StorageError::Corrupt {
            key: key.as_str().to_string(),
            source,
        })?;
        self.staged.insert(key, value);
        Ok(())
    }
}

fn not_locked(key: StateKey) -> StorageError {
    StorageError::QueryFailed(format!("{} not locked by this transaction", key.as_str()))
}

struct Inner {
    backend: Box<dyn KvBackend>,
    locks: [Mutex<()>; 5],
    changes: broadcast::Sender<StateChange>,
}

/// Process-wide handle to the persisted state. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(backend: impl KvBackend + 'static) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                backend: Box::new(backend),
                locks: Default::default(),
                changes,
            }),
        }
    }

    /// Subscribe to change notifications for every later write.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    /// Run `f` against the current values of `keys` while holding their
    /// locks, then persist whatever it staged.
    ///
    /// Nothing is written if `f` fails. Only values that differ from what
    /// was read are written and announced.
    pub async fn transact<R>(
        &self,
        keys: &[StateKey],
        f: impl FnOnce(&mut Batch) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let ordered: BTreeSet<StateKey> = keys.iter().copied().collect();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in &ordered {
            guards.push(self.inner.locks[key.index()].lock().await);
        }

        let names: Vec<&str> = ordered.iter().map(|k| k.as_str()).collect();
        let mut fetched = self.inner.backend.get(&names)?;
        let values = ordered
            .iter()
            .map(|k| (*k, fetched.remove(k.as_str())))
            .collect();

        let mut batch = Batch {
            values,
            staged: BTreeMap::new(),
        };
        let result = f(&mut batch)?;

        let changed: Vec<(StateKey, Value)> = batch
            .staged
            .into_iter()
            .filter(|(k, v)| batch.values.get(k).and_then(|old| old.as_ref()) != Some(v))
            .collect();

        if !changed.is_empty() {
            let entries: Vec<(&str, Value)> =
                changed.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
            self.inner.backend.set(&entries)?;
            // No receivers is fine.
            let _ = self.inner.changes.send(StateChange {
                keys: changed.into_iter().map(|(k, _)| k).collect(),
            });
        }

        drop(guards);
        Ok(result)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: StateKey) -> Result<Option<T>, StorageError> {
        self.transact(&[key], |batch| batch.get(key)).await
    }

    pub async fn set<T: Serialize>(&self, key: StateKey, value: &T) -> Result<(), StorageError> {
        self.transact(&[key], |batch| batch.put(key, value)).await
    }

    // ── Typed accessors ──────────────────────────────────────────────

    pub async fn watched(&self) -> Result<Vec<WatchedEntry>, StorageError> {
        Ok(self.get(StateKey::Watched).await?.unwrap_or_default())
    }

    pub async fn bank(&self) -> Result<Vec<BankedEntry>, StorageError> {
        Ok(self.get(StateKey::Bank).await?.unwrap_or_default())
    }

    pub async fn last_reset_date(&self) -> Result<Option<String>, StorageError> {
        self.get(StateKey::LastResetDate).await
    }

    /// Absent flags read as `true`.
    pub async fn preferences(&self) -> Result<Preferences, StorageError> {
        self.transact(&[StateKey::Enabled, StateKey::DarkMode], |batch| {
            Ok(Preferences {
                enabled: batch.get(StateKey::Enabled)?.unwrap_or(true),
                dark_theme: batch.get(StateKey::DarkMode)?.unwrap_or(true),
            })
        })
        .await
    }

    pub async fn is_enabled(&self) -> Result<bool, StorageError> {
        Ok(self.get(StateKey::Enabled).await?.unwrap_or(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[tokio::test]
    async fn absent_flags_default_to_true() {
        let store = Store::new(MemoryBackend::new());
        let prefs = store.preferences().await.unwrap();
        assert!(prefs.enabled);
        assert!(prefs.dark_theme);
        assert!(store.watched().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unlocked_keys_are_refused() {
        let store = Store::new(MemoryBackend::new());
        let read = store
            .transact(&[StateKey::Watched], |batch| batch.get::<bool>(StateKey::Enabled))
            .await;
        assert!(matches!(read, Err(StorageError::QueryFailed(ref m)) if m.contains("extensionEnabled")));

        let mut rx = store.subscribe();
        let write = store
            .transact(&[StateKey::Watched], |batch| batch.put(StateKey::DarkMode, &false))
            .await;
        assert!(matches!(write, Err(StorageError::QueryFailed(_))));
        assert!(rx.try_recv().is_err());
        assert!(store.preferences().await.unwrap().dark_theme);
    }

    #[tokio::test]
    async fn only_real_changes_are_announced() {
        let store = Store::new(MemoryBackend::new());
        let mut rx = store.subscribe();

        store.set(StateKey::Enabled, &false).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().keys, vec![StateKey::Enabled]);

        store.set(StateKey::Enabled, &false).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_transaction_writes_nothing() {
        let store = Store::new(MemoryBackend::new());
        let result: Result<(), StorageError> = store
            .transact(&[StateKey::LastResetDate], |batch| {
                batch.put(StateKey::LastResetDate, &"2024-01-01")?;
                Err(StorageError::Locked)
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.last_reset_date().await.unwrap(), None);
    }

    #[tokio::test]
    async fn staged_values_are_visible_within_batch() {
        let store = Store::new(MemoryBackend::new());
        let seen: Option<String> = store
            .transact(&[StateKey::LastResetDate], |batch| {
                batch.put(StateKey::LastResetDate, &"2024-02-02")?;
                batch.get(StateKey::LastResetDate)
            })
            .await
            .unwrap();
        assert_eq!(seen.as_deref(), Some("2024-02-02"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_not_lost() {
        let store = Store::new(MemoryBackend::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .transact(&[StateKey::Watched], |batch| {
                        let mut ids: Vec<u32> = batch.get_or_default(StateKey::Watched)?;
                        ids.push(i);
                        batch.put(StateKey::Watched, &ids)
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let ids: Vec<u32> = store.get(StateKey::Watched).await.unwrap().unwrap();
        assert_eq!(ids.len(), 32);
    }
}
