use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::browser::TabId;
use crate::messaging::Response;

/// How an overlay ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Counted { response: Response },
    Banked { response: Response },
    Skipped { timed_out: bool },
}

/// Every visible state change produces an Event.
/// The CLI prints them; tests wait on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Navigation watcher let a video through.
    TabAllowed {
        tab: TabId,
        video_id: String,
        at: DateTime<Utc>,
    },
    /// Navigation watcher sent a tab to the block page.
    TabBlocked {
        tab: TabId,
        video_id: String,
        at: DateTime<Utc>,
    },
    /// Limit styling re-derived for all watched tabs.
    TabsRestyled {
        tabs: usize,
        limit_reached: bool,
        at: DateTime<Utc>,
    },
    OverlayShown {
        video_id: String,
        title: String,
        current_count: usize,
        bank_count: usize,
        bank_enabled: bool,
        countdown_secs: u32,
        at: DateTime<Utc>,
    },
    CountdownTick {
        video_id: String,
        remaining: u32,
        at: DateTime<Utc>,
    },
    OverlayResolved {
        video_id: String,
        resolution: Resolution,
        at: DateTime<Utc>,
    },
    /// Overlay torn down by navigation before any decision.
    OverlayDiscarded {
        video_id: String,
        at: DateTime<Utc>,
    },
}
