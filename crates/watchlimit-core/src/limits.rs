//! Limit engine.
//!
//! Decides whether a video may be opened and records the user's choice.
//! Every call re-reads the store (after the daily reset check), so the
//! popup, the overlay and the navigation watcher never disagree about
//! counts. Writes run inside a store transaction, which makes the
//! check-then-append of `record_*` atomic with respect to other tabs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StorageError;
use crate::model::{BankedEntry, DailyState, WatchedEntry};
use crate::reset::{reset_if_new_day, Clock};
use crate::storage::{LimitsConfig, StateKey, Store, MAX_BANK_CAPACITY, MAX_DAILY_LIMIT};

/// Outcome of [`LimitEngine::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    AlreadyWatched,
    AlreadyBanked,
    LimitReached,
    Eligible,
}

/// Outcome of [`LimitEngine::record_watched`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Appended; `count` is the new length of the watched list.
    Added { count: usize },
    AlreadyWatched,
    LimitReached,
}

/// Outcome of [`LimitEngine::record_banked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankOutcome {
    Added { count: usize },
    AlreadyBanked,
    BankFull,
}

/// Inputs of a decision, read in one pass.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub enabled: bool,
    pub watched: Vec<WatchedEntry>,
    pub bank: Vec<BankedEntry>,
}

impl Evaluation {
    pub fn classify(&self, video_id: &str, daily_limit: usize) -> Classification {
        if !self.enabled {
            return Classification::Eligible;
        }
        if self.watched.iter().any(|v| v.id == video_id) {
            Classification::AlreadyWatched
        } else if self.bank.iter().any(|v| v.id == video_id) {
            Classification::AlreadyBanked
        } else if self.watched.len() >= daily_limit {
            Classification::LimitReached
        } else {
            Classification::Eligible
        }
    }
}

#[derive(Clone)]
pub struct LimitEngine {
    store: Store,
    clock: Arc<dyn Clock>,
    limits: LimitsConfig,
}

impl LimitEngine {
    /// Caps above the hard ceilings (or zero) are clamped into range.
    pub fn new(store: Store, clock: Arc<dyn Clock>, limits: LimitsConfig) -> Self {
        if let Err(e) = limits.validate() {
            tracing::warn!(error = %e, "clamping limits");
        }
        let limits = LimitsConfig {
            daily_limit: limits.daily_limit.clamp(1, MAX_DAILY_LIMIT),
            bank_capacity: limits.bank_capacity.clamp(1, MAX_BANK_CAPACITY),
        };
        Self {
            store,
            clock,
            limits,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Run the daily reset check.
    pub async fn refresh(&self) -> Result<bool, StorageError> {
        reset_if_new_day(&self.store, self.clock.as_ref()).await
    }

    /// Fresh read of everything a decision depends on.
    pub async fn evaluate(&self) -> Result<Evaluation, StorageError> {
        self.refresh().await?;
        self.store
            .transact(&[StateKey::Watched, StateKey::Bank, StateKey::Enabled], |batch| {
                Ok(Evaluation {
                    enabled: batch.get(StateKey::Enabled)?.unwrap_or(true),
                    watched: batch.get_or_default(StateKey::Watched)?,
                    bank: batch.get_or_default(StateKey::Bank)?,
                })
            })
            .await
    }

    /// Classify a video against the current state. A disabled extension
    /// makes every video eligible.
    pub async fn classify(&self, video_id: &str) -> Result<Classification, StorageError> {
        let eval = self.evaluate().await?;
        let class = eval.classify(video_id, self.limits.daily_limit);
        tracing::debug!(video_id, ?class, watched = eval.watched.len(), "classified");
        Ok(class)
    }

    /// Count a video against today's limit.
    pub async fn record_watched(&self, video_id: &str, title: &str) -> Result<WatchOutcome, StorageError> {
        self.refresh().await?;
        let limit = self.limits.daily_limit;
        let now = self.clock.now();

        let outcome = self
            .store
            .transact(&[StateKey::Watched], |batch| {
                let mut watched: Vec<WatchedEntry> = batch.get_or_default(StateKey::Watched)?;
                if watched.iter().any(|v| v.id == video_id) {
                    return Ok(WatchOutcome::AlreadyWatched);
                }
                if watched.len() >= limit {
                    return Ok(WatchOutcome::LimitReached);
                }
                watched.push(WatchedEntry::new(video_id, title, now));
                batch.put(StateKey::Watched, &watched)?;
                Ok(WatchOutcome::Added {
                    count: watched.len(),
                })
            })
            .await?;

        if let WatchOutcome::Added { count } = outcome {
            tracing::info!(video_id, title, count, "video counted");
            if count >= limit {
                tracing::info!(limit, "daily limit reached");
            }
        }
        Ok(outcome)
    }

    /// Defer a video into the bank. Independent of the watched limit.
    pub async fn record_banked(&self, video_id: &str, title: &str) -> Result<BankOutcome, StorageError> {
        let capacity = self.limits.bank_capacity;
        let now = self.clock.now();

        let outcome = self
            .store
            .transact(&[StateKey::Bank], |batch| {
                let mut bank: Vec<BankedEntry> = batch.get_or_default(StateKey::Bank)?;
                if bank.iter().any(|v| v.id == video_id) {
                    return Ok(BankOutcome::AlreadyBanked);
                }
                if bank.len() >= capacity {
                    return Ok(BankOutcome::BankFull);
                }
                bank.push(BankedEntry::new(video_id, title, now));
                batch.put(StateKey::Bank, &bank)?;
                Ok(BankOutcome::Added { count: bank.len() })
            })
            .await?;

        if let BankOutcome::Added { count } = outcome {
            tracing::info!(video_id, title, count, "video banked");
        }
        Ok(outcome)
    }

    /// Drop a video from today's list. Absent ids are a no-op.
    pub async fn remove_watched(&self, video_id: &str) -> Result<(), StorageError> {
        self.store
            .transact(&[StateKey::Watched], |batch| {
                let mut watched: Vec<WatchedEntry> = batch.get_or_default(StateKey::Watched)?;
                watched.retain(|v| v.id != video_id);
                batch.put(StateKey::Watched, &watched)
            })
            .await
    }

    /// Drop a video from the bank. Absent ids are a no-op.
    pub async fn remove_banked(&self, video_id: &str) -> Result<(), StorageError> {
        self.store
            .transact(&[StateKey::Bank], |batch| {
                let mut bank: Vec<BankedEntry> = batch.get_or_default(StateKey::Bank)?;
                bank.retain(|v| v.id != video_id);
                batch.put(StateKey::Bank, &bank)
            })
            .await
    }

    /// Everything the popup shows, after the reset check.
    pub async fn snapshot(&self) -> Result<DailyState, StorageError> {
        self.refresh().await?;
        let (watched, bank, last_reset_date) = self
            .store
            .transact(&[StateKey::Watched, StateKey::Bank, StateKey::LastResetDate], |batch| {
                Ok((
                    batch.get_or_default(StateKey::Watched)?,
                    batch.get_or_default(StateKey::Bank)?,
                    batch.get(StateKey::LastResetDate)?,
                ))
            })
            .await?;
        Ok(DailyState {
            watched,
            bank,
            last_reset_date,
            preferences: self.store.preferences().await?,
            daily_limit: self.limits.daily_limit,
            bank_capacity: self.limits.bank_capacity,
        })
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), StorageError> {
        self.store.set(StateKey::Enabled, &enabled).await?;
        tracing::info!(enabled, "extension toggled");
        Ok(())
    }

    /// Flip the enabled flag, returning the new value.
    pub async fn toggle_enabled(&self) -> Result<bool, StorageError> {
        self.toggle(StateKey::Enabled).await
    }

    /// Flip the theme flag, returning the new value.
    pub async fn toggle_dark_theme(&self) -> Result<bool, StorageError> {
        self.toggle(StateKey::DarkMode).await
    }

    async fn toggle(&self, key: StateKey) -> Result<bool, StorageError> {
        self.store
            .transact(&[key], |batch| {
                let next = !batch.get::<bool>(key)?.unwrap_or(true);
                batch.put(key, &next)?;
                Ok(next)
            })
            .await
    }

    /// First-run setup: reset check, then seed absent defaults.
    pub async fn on_installed(&self) -> Result<(), StorageError> {
        self.refresh().await?;
        self.store
            .transact(&[StateKey::Enabled, StateKey::DarkMode, StateKey::Bank], |batch| {
                if batch.get::<bool>(StateKey::Enabled)?.is_none() {
                    batch.put(StateKey::Enabled, &true)?;
                }
                if batch.get::<bool>(StateKey::DarkMode)?.is_none() {
                    batch.put(StateKey::DarkMode, &true)?;
                }
                if batch.get::<Vec<BankedEntry>>(StateKey::Bank)?.is_none() {
                    batch.put(StateKey::Bank, &Vec::<BankedEntry>::new())?;
                }
                Ok(())
            })
            .await
    }
}
