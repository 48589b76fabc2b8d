//! Navigation watcher.
//!
//! Reacts to full page loads and in-page (history API) navigations. A
//! watch-page URL moves its tab through
//!
//! ```text
//! Idle -> Evaluating -> (Blocked | Allowed)
//! ```
//!
//! Blocked tabs are sent to the bundled block page. Independently, any
//! change to `watchedVideosToday` or `extensionEnabled` re-derives the
//! limit-reached styling for every open tab on the watched host, because
//! the limit is global.
//!
//! Evaluations are not cancelled when a tab navigates again. Instead the
//! tab is re-read right before redirecting and the redirect is dropped if
//! the tab now shows something else.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use url::Url;

use crate::browser::{BrowserHost, TabId};
use crate::error::CoreError;
use crate::events::Event;
use crate::limits::{Classification, LimitEngine};
use crate::storage::{NavigationConfig, StateChange, StateKey};

/// True if `url` is on `host` or one of its subdomains.
pub fn is_host_url(url: &str, host: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == host || h.ends_with(&format!(".{host}"))))
        .unwrap_or(false)
}

/// True for `/watch` pages on `host`, whether or not they carry an id.
pub fn is_watch_url(url: &str, host: &str) -> bool {
    is_host_url(url, host) && Url::parse(url).map(|u| u.path() == "/watch").unwrap_or(false)
}

/// The `v` query parameter of a watch URL.
pub fn extract_video_id(url: &str) -> Result<String, CoreError> {
    let malformed = || CoreError::MalformedUrl {
        url: url.to_string(),
    };
    let parsed = Url::parse(url).map_err(|_| malformed())?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "v")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(malformed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// A full page load finished.
    PageLoaded,
    /// The page changed its URL through the history API.
    HistoryStateUpdated { frame_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationEvent {
    pub tab: TabId,
    pub url: String,
    pub kind: NavigationKind,
}

impl NavigationEvent {
    pub fn page_loaded(tab: TabId, url: &str) -> Self {
        Self {
            tab,
            url: url.to_string(),
            kind: NavigationKind::PageLoaded,
        }
    }

    pub fn history_updated(tab: TabId, url: &str) -> Self {
        Self {
            tab,
            url: url.to_string(),
            kind: NavigationKind::HistoryStateUpdated { frame_id: 0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabPhase {
    Idle,
    Evaluating { video_id: String },
    Blocked { video_id: String },
    Allowed { video_id: String },
}

pub struct NavigationWatcher {
    engine: LimitEngine,
    host: Arc<dyn BrowserHost>,
    config: NavigationConfig,
    phases: Mutex<HashMap<TabId, TabPhase>>,
    events: broadcast::Sender<Event>,
}

impl NavigationWatcher {
    pub fn new(engine: LimitEngine, host: Arc<dyn BrowserHost>, config: NavigationConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            engine,
            host,
            config,
            phases: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn phase(&self, tab: TabId) -> TabPhase {
        self.with_phases(|p| p.get(&tab).cloned().unwrap_or(TabPhase::Idle))
    }

    /// Drop bookkeeping for a closed tab.
    pub fn forget(&self, tab: TabId) {
        self.with_phases(|p| {
            p.remove(&tab);
        });
    }

    fn with_phases<R>(&self, f: impl FnOnce(&mut HashMap<TabId, TabPhase>) -> R) -> R {
        match self.phases.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn set_phase(&self, tab: TabId, phase: TabPhase) {
        self.with_phases(|p| {
            p.insert(tab, phase);
        });
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn block_page_url(&self) -> String {
        self.host.resource_url(&self.config.block_page)
    }

    /// Startup: reset check, seed defaults, style every open tab.
    pub async fn start(&self) {
        if let Err(e) = self.engine.on_installed().await {
            tracing::warn!(error = %e, "startup initialisation failed");
        }
        self.restyle_all().await;
    }

    /// React to one navigation. Returns the tab's resulting phase.
    pub async fn handle(&self, event: NavigationEvent) -> TabPhase {
        let NavigationEvent { tab, url, kind } = event;

        if let NavigationKind::HistoryStateUpdated { frame_id } = kind {
            if frame_id != 0 {
                return self.phase(tab);
            }
        }
        if url.starts_with(&self.block_page_url()) {
            tracing::debug!(%tab, "tab is on the block page");
            return self.phase(tab);
        }
        if !is_host_url(&url, &self.config.host) {
            return self.phase(tab);
        }

        let phase = if is_watch_url(&url, &self.config.host) {
            self.evaluate(tab, &url).await
        } else {
            self.set_phase(tab, TabPhase::Idle);
            TabPhase::Idle
        };

        if kind == NavigationKind::PageLoaded && !matches!(phase, TabPhase::Blocked { .. }) {
            self.restyle_tab(tab).await;
        }
        phase
    }

    async fn evaluate(&self, tab: TabId, url: &str) -> TabPhase {
        let video_id = match extract_video_id(url) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(%tab, error = %e, "ignoring navigation");
                self.set_phase(tab, TabPhase::Idle);
                return TabPhase::Idle;
            }
        };
        self.set_phase(
            tab,
            TabPhase::Evaluating {
                video_id: video_id.clone(),
            },
        );

        let class = match self.engine.classify(&video_id).await {
            Ok(class) => class,
            Err(e) => {
                tracing::warn!(%tab, video_id = %video_id, error = %e, "cannot evaluate, letting navigation through");
                self.set_phase(tab, TabPhase::Idle);
                return TabPhase::Idle;
            }
        };

        if class != Classification::LimitReached {
            let allowed = TabPhase::Allowed {
                video_id: video_id.clone(),
            };
            let (phase, settled) = self.settle(tab, &video_id, allowed);
            if settled {
                self.emit(Event::TabAllowed {
                    tab,
                    video_id,
                    at: Utc::now(),
                });
            } else {
                tracing::debug!(%tab, video_id = %video_id, "newer navigation already settled the tab");
            }
            return phase;
        }

        match self.redirect_if_current(tab, &video_id) {
            Ok(true) => {
                tracing::info!(%tab, video_id = %video_id, "daily limit reached, blocking video");
                let phase = TabPhase::Blocked {
                    video_id: video_id.clone(),
                };
                self.set_phase(tab, phase.clone());
                self.emit(Event::TabBlocked {
                    tab,
                    video_id,
                    at: Utc::now(),
                });
                phase
            }
            Ok(false) => {
                tracing::debug!(%tab, video_id = %video_id, "tab moved on, dropping stale block");
                self.settle(tab, &video_id, TabPhase::Idle).0
            }
            Err(e) => {
                tracing::debug!(%tab, error = %e, "skipping redirect");
                self.forget(tab);
                TabPhase::Idle
            }
        }
    }

    /// Write `outcome` only if the tab is still evaluating `video_id`.
    /// Returns the tab's phase afterwards and whether `outcome` was written.
    fn settle(&self, tab: TabId, video_id: &str, outcome: TabPhase) -> (TabPhase, bool) {
        self.with_phases(|p| {
            let current = matches!(
                p.get(&tab),
                Some(TabPhase::Evaluating { video_id: id }) if id == video_id
            );
            if current {
                p.insert(tab, outcome.clone());
                (outcome, true)
            } else {
                (p.get(&tab).cloned().unwrap_or(TabPhase::Idle), false)
            }
        })
    }

    /// Redirect only if the tab still shows `video_id`.
    fn redirect_if_current(&self, tab: TabId, video_id: &str) -> Result<bool, CoreError> {
        let current = self.host.tab(tab).ok_or(CoreError::TabGone(tab))?;
        if extract_video_id(&current.url).ok().as_deref() != Some(video_id) {
            return Ok(false);
        }
        self.host.redirect(tab, &self.block_page_url())?;
        Ok(true)
    }

    async fn limit_active(&self) -> Option<bool> {
        match self.engine.evaluate().await {
            Ok(eval) => Some(eval.enabled && eval.watched.len() >= self.engine.limits().daily_limit),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read state for styling");
                None
            }
        }
    }

    fn style(&self, tab: TabId, limit_reached: bool) {
        let result = if limit_reached {
            self.host.apply_limit_styles(tab)
        } else {
            self.host.remove_limit_styles(tab)
        };
        if let Err(e) = result {
            tracing::debug!(%tab, error = %e, "skipping styling");
        }
    }

    async fn restyle_tab(&self, tab: TabId) {
        if let Some(limit_reached) = self.limit_active().await {
            self.style(tab, limit_reached);
        }
    }

    /// Re-derive limit styling for every open tab on the watched host.
    pub async fn restyle_all(&self) {
        let Some(limit_reached) = self.limit_active().await else {
            return;
        };
        let tabs = self.host.query_tabs(&self.config.host);
        for tab in &tabs {
            self.style(tab.id, limit_reached);
        }
        tracing::debug!(tabs = tabs.len(), limit_reached, "restyled tabs");
        self.emit(Event::TabsRestyled {
            tabs: tabs.len(),
            limit_reached,
            at: Utc::now(),
        });
    }

    /// Drive the watcher until the navigation stream ends.
    ///
    /// Each navigation is evaluated on its own task so a slow store read
    /// for one tab does not hold up another.
    pub async fn run(
        self: Arc<Self>,
        mut navigations: mpsc::Receiver<NavigationEvent>,
        mut changes: broadcast::Receiver<StateChange>,
    ) {
        let mut changes_open = true;
        loop {
            tokio::select! {
                nav = navigations.recv() => {
                    let Some(nav) = nav else { break };
                    let watcher = Arc::clone(&self);
                    tokio::spawn(async move {
                        watcher.handle(nav).await;
                    });
                }
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => {
                        if change.touches(StateKey::Watched) || change.touches(StateKey::Enabled) {
                            self.restyle_all().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "change feed lagged, restyling");
                        self.restyle_all().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => changes_open = false,
                },
            }
        }
    }
}
