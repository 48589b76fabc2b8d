//! Persisted entries and the views built from them.
//!
//! Timestamps are stored as epoch milliseconds so the persisted document
//! keeps the `{id, title, addedAt}` shape other readers expect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Thumbnail template; `{id}` is replaced with the video id.
pub const THUMBNAIL_TEMPLATE: &str = "https://i.ytimg.com/vi/{id}/mqdefault.jpg";

pub fn thumbnail_url(video_id: &str) -> String {
    THUMBNAIL_TEMPLATE.replace("{id}", video_id)
}

/// A video counted against today's limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedEntry {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
}

impl WatchedEntry {
    pub fn new(id: &str, title: &str, added_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            thumbnail: Some(thumbnail_url(id)),
            added_at,
        }
    }
}

/// A video deferred from today's count. Survives the daily reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankedEntry {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub banked_at: DateTime<Utc>,
}

impl BankedEntry {
    pub fn new(id: &str, title: &str, banked_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            thumbnail: Some(thumbnail_url(id)),
            banked_at,
        }
    }
}

/// User toggles shown in the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub enabled: bool,
    pub dark_theme: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: true,
            dark_theme: true,
        }
    }
}

/// Everything the popup renders, read fresh from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyState {
    pub watched: Vec<WatchedEntry>,
    pub bank: Vec<BankedEntry>,
    pub last_reset_date: Option<String>,
    pub preferences: Preferences,
    pub daily_limit: usize,
    pub bank_capacity: usize,
}

impl DailyState {
    pub fn remaining(&self) -> usize {
        self.daily_limit.saturating_sub(self.watched.len())
    }

    pub fn bank_remaining(&self) -> usize {
        self.bank_capacity.saturating_sub(self.bank.len())
    }

    pub fn limit_reached(&self) -> bool {
        self.watched.len() >= self.daily_limit
    }

    /// 0.0 .. 100.0 share of today's limit used.
    pub fn progress_pct(&self) -> f64 {
        if self.daily_limit == 0 {
            return 100.0;
        }
        (self.watched.len() as f64 / self.daily_limit as f64 * 100.0).min(100.0)
    }
}
