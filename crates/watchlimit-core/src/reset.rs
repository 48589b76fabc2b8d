//! Daily reset policy.
//!
//! The watched list belongs to one local calendar day. The first check
//! that sees a stored `lastResetDate` different from today clears it and
//! records today; the bank is never touched. Callers run the check before
//! every read that depends on `watched` being fresh.

use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::model::WatchedEntry;
use crate::storage::{StateKey, Store};

/// Source of "now" and "today".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local calendar day.
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    today: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        let now = today
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        Self {
            now: Mutex::new(now),
            today: Mutex::new(today),
        }
    }

    pub fn set_today(&self, today: NaiveDate) {
        if let Ok(mut guard) = self.today.lock() {
            *guard = today;
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|g| *g).unwrap_or_else(|p| *p.into_inner())
    }

    fn today(&self) -> NaiveDate {
        self.today.lock().map(|g| *g).unwrap_or_else(|p| *p.into_inner())
    }
}

/// `YYYY-MM-DD`, the persisted form of a reset date.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Clear `watched` if the stored reset date is not today.
///
/// Returns `true` when a reset happened. The clear and the date update are
/// one transaction, so concurrent callers reset at most once per day. The
/// resulting store change is what restyles open tabs.
pub async fn reset_if_new_day(store: &Store, clock: &dyn Clock) -> Result<bool, StorageError> {
    let today = date_key(clock.today());
    let reset = store
        .transact(&[StateKey::Watched, StateKey::LastResetDate], |batch| {
            let last: Option<String> = batch.get(StateKey::LastResetDate)?;
            if last.as_deref() == Some(today.as_str()) {
                return Ok(false);
            }
            batch.put(StateKey::Watched, &Vec::<WatchedEntry>::new())?;
            batch.put(StateKey::LastResetDate, &today)?;
            Ok(true)
        })
        .await?;

    if reset {
        tracing::info!(date = %today, "new day, watched list reset");
    }
    Ok(reset)
}
