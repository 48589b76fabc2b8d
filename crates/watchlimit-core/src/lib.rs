//! # Watchlimit Core Library
//!
//! Core logic for watchlimit, a daily limit on watched videos with a small
//! "bank" of videos saved for later. Everything the browser extension does
//! lives here; the CLI binary and any browser shell are thin layers over it.
//!
//! ## Architecture
//!
//! - **Storage**: a key-value store (SQLite or in-memory) behind [`Store`],
//!   which serializes read-modify-write updates per key
//! - **Limits**: [`LimitEngine`] owns the watched list, the bank and the
//!   daily reset
//! - **Messaging**: [`Background`] answers the content side's requests
//! - **Navigation**: [`NavigationWatcher`] blocks tabs once the limit is hit
//! - **Overlay**: [`OverlayController`] asks the user before a video counts
//!
//! ## Key Components
//!
//! - [`Config`]: limits, overlay timings and navigation targets (TOML)
//! - [`BrowserHost`] and [`Page`]: the seams to a real browser

pub mod browser;
pub mod error;
pub mod events;
pub mod limits;
pub mod messaging;
pub mod model;
pub mod navigation;
pub mod overlay;
pub mod reset;
pub mod storage;

pub use browser::{BrowserHost, HostAction, MemoryHost, Tab, TabId};
pub use error::{ConfigError, CoreError, StorageError};
pub use events::{Event, Resolution};
pub use limits::{BankOutcome, Classification, LimitEngine, WatchOutcome};
pub use messaging::{Background, Request, Response, StatusReason};
pub use model::{BankedEntry, DailyState, Preferences, WatchedEntry};
pub use navigation::{NavigationEvent, NavigationKind, NavigationWatcher, TabPhase};
pub use overlay::{Decision, OverlayController, OverlayPhase, OverlayView, Page};
pub use reset::{Clock, FixedClock, SystemClock};
pub use storage::{Config, KvBackend, MemoryBackend, SqliteBackend, StateKey, Store};
