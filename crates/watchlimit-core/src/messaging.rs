//! Tab ↔ background message protocol.
//!
//! Requests are `{action, videoId?, videoTitle?}` documents; the action
//! string selects the variant, and [`Background::handle`] matches every
//! variant exhaustively. Storage failures never escape: they become a
//! `success: false` response, and a status query that cannot be answered
//! says "don't show the overlay".

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::limits::{BankOutcome, Classification, LimitEngine, WatchOutcome};

pub const MSG_COUNTED: &str = "Video added to count";
pub const MSG_ALREADY_COUNTED: &str = "Video already counted";
pub const MSG_LIMIT_REACHED: &str = "Daily limit reached";
pub const MSG_BANKED: &str = "Video added to bank";
pub const MSG_ALREADY_BANKED: &str = "Video already in bank";

/// Title used when the page offers none.
pub const UNKNOWN_TITLE: &str = "Unknown Video";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    AddVideoToCount {
        video_id: String,
        #[serde(default)]
        video_title: String,
    },
    #[serde(rename_all = "camelCase")]
    AddVideoToBank {
        video_id: String,
        #[serde(default)]
        video_title: String,
    },
    #[serde(rename_all = "camelCase")]
    RemoveVideo { video_id: String },
    #[serde(rename_all = "camelCase")]
    RemoveVideoFromBank { video_id: String },
    #[serde(rename_all = "camelCase")]
    CheckVideoStatus { video_id: String },
}

/// Why `checkVideoStatus` said not to show the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusReason {
    Disabled,
    AlreadyWatched,
    AlreadyBanked,
    LimitReached,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_show_overlay: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_remaining: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
}

impl Response {
    fn ok(message: &str) -> Self {
        Self {
            success: Some(true),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn done() -> Self {
        Self {
            success: Some(true),
            ..Default::default()
        }
    }

    fn refused(message: String) -> Self {
        Self {
            success: Some(false),
            message: Some(message),
            ..Default::default()
        }
    }

    fn hidden(reason: StatusReason) -> Self {
        Self {
            should_show_overlay: Some(false),
            reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.success == Some(true)
    }

    pub fn shows_overlay(&self) -> bool {
        self.should_show_overlay == Some(true)
    }
}

/// Background-side dispatcher.
#[derive(Clone)]
pub struct Background {
    engine: LimitEngine,
}

impl Background {
    pub fn new(engine: LimitEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &LimitEngine {
        &self.engine
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::AddVideoToCount {
                video_id,
                video_title,
            } => self.add_to_count(&video_id, title_or_unknown(&video_title)).await,
            Request::AddVideoToBank {
                video_id,
                video_title,
            } => self.add_to_bank(&video_id, title_or_unknown(&video_title)).await,
            Request::RemoveVideo { video_id } => {
                absorb(self.engine.remove_watched(&video_id).await.map(|_| Response::done()))
            }
            Request::RemoveVideoFromBank { video_id } => {
                absorb(self.engine.remove_banked(&video_id).await.map(|_| Response::done()))
            }
            Request::CheckVideoStatus { video_id } => self.check_status(&video_id).await,
        }
    }

    /// Wire-level entry point: JSON request in, JSON response out.
    pub async fn handle_json(&self, request: &str) -> Result<String, serde_json::Error> {
        let request: Request = serde_json::from_str(request)?;
        serde_json::to_string(&self.handle(request).await)
    }

    async fn add_to_count(&self, video_id: &str, title: &str) -> Response {
        let outcome = self.engine.record_watched(video_id, title).await;
        absorb(outcome.map(|o| match o {
            WatchOutcome::Added { .. } => Response::ok(MSG_COUNTED),
            WatchOutcome::AlreadyWatched => Response::ok(MSG_ALREADY_COUNTED),
            WatchOutcome::LimitReached => Response::refused(MSG_LIMIT_REACHED.to_string()),
        }))
    }

    async fn add_to_bank(&self, video_id: &str, title: &str) -> Response {
        let capacity = self.engine.limits().bank_capacity;
        let outcome = self.engine.record_banked(video_id, title).await;
        absorb(outcome.map(|o| match o {
            BankOutcome::Added { .. } => Response::ok(MSG_BANKED),
            BankOutcome::AlreadyBanked => Response::ok(MSG_ALREADY_BANKED),
            BankOutcome::BankFull => {
                Response::refused(format!("Bank limit reached ({capacity} videos max)"))
            }
        }))
    }

    async fn check_status(&self, video_id: &str) -> Response {
        let eval = match self.engine.evaluate().await {
            Ok(eval) => eval,
            Err(e) => {
                tracing::warn!(video_id, error = %e, "cannot evaluate video status");
                return Response::hidden(StatusReason::Unavailable);
            }
        };
        if !eval.enabled {
            return Response::hidden(StatusReason::Disabled);
        }

        let limits = self.engine.limits();
        match eval.classify(video_id, limits.daily_limit) {
            Classification::AlreadyWatched => Response::hidden(StatusReason::AlreadyWatched),
            Classification::AlreadyBanked => Response::hidden(StatusReason::AlreadyBanked),
            Classification::LimitReached => Response::hidden(StatusReason::LimitReached),
            Classification::Eligible => Response {
                should_show_overlay: Some(true),
                current_count: Some(eval.watched.len()),
                remaining: Some(limits.daily_limit.saturating_sub(eval.watched.len())),
                bank_count: Some(eval.bank.len()),
                bank_remaining: Some(limits.bank_capacity.saturating_sub(eval.bank.len())),
                ..Default::default()
            },
        }
    }
}

fn title_or_unknown(title: &str) -> &str {
    let title = title.trim();
    if title.is_empty() {
        UNKNOWN_TITLE
    } else {
        title
    }
}

fn absorb(result: Result<Response, StorageError>) -> Response {
    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "request failed");
        Response::refused(e.to_string())
    })
}
