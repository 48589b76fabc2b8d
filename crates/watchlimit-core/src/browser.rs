//! The browser as seen from the background side.
//!
//! Everything the watcher does to tabs goes through [`BrowserHost`]:
//! listing them, re-reading one, redirecting it and toggling the
//! limit-reached stylesheet. [`MemoryHost`] keeps a tab table in memory and
//! records every action; the CLI drives it from the terminal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub url: String,
}

pub trait BrowserHost: Send + Sync {
    /// Open tabs whose host is `host` or one of its subdomains.
    fn query_tabs(&self, host: &str) -> Vec<Tab>;

    /// Current state of a tab, `None` once it is closed.
    fn tab(&self, id: TabId) -> Option<Tab>;

    /// Navigate a tab. Fails with `TabGone` if it closed meanwhile.
    fn redirect(&self, id: TabId, url: &str) -> Result<(), CoreError>;

    fn apply_limit_styles(&self, id: TabId) -> Result<(), CoreError>;

    fn remove_limit_styles(&self, id: TabId) -> Result<(), CoreError>;

    /// Absolute URL of a bundled resource.
    fn resource_url(&self, path: &str) -> String;
}

/// Host-side actions, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    Redirected { tab: TabId, url: String },
    StylesApplied(TabId),
    StylesRemoved(TabId),
}

#[derive(Debug, Default)]
struct MemoryTabs {
    next_id: u32,
    tabs: BTreeMap<TabId, MemoryTab>,
    actions: Vec<HostAction>,
}

#[derive(Debug)]
struct MemoryTab {
    url: String,
    styled: bool,
}

/// In-memory tab table.
#[derive(Debug)]
pub struct MemoryHost {
    origin: String,
    inner: Mutex<MemoryTabs>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new("chrome-extension://watchlimit")
    }
}

impl MemoryHost {
    /// `origin` prefixes bundled resource URLs.
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            inner: Mutex::new(MemoryTabs {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryTabs) -> R) -> R {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn open_tab(&self, url: &str) -> TabId {
        self.with(|t| {
            let id = TabId(t.next_id);
            t.next_id += 1;
            t.tabs.insert(
                id,
                MemoryTab {
                    url: url.to_string(),
                    styled: false,
                },
            );
            id
        })
    }

    pub fn close_tab(&self, id: TabId) {
        self.with(|t| {
            t.tabs.remove(&id);
        });
    }

    /// User-initiated navigation; not recorded as a host action.
    pub fn set_url(&self, id: TabId, url: &str) {
        self.with(|t| {
            if let Some(tab) = t.tabs.get_mut(&id) {
                tab.url = url.to_string();
            }
        });
    }

    pub fn is_styled(&self, id: TabId) -> bool {
        self.with(|t| t.tabs.get(&id).map(|tab| tab.styled).unwrap_or(false))
    }

    pub fn actions(&self) -> Vec<HostAction> {
        self.with(|t| t.actions.clone())
    }

    pub fn take_actions(&self) -> Vec<HostAction> {
        self.with(|t| std::mem::take(&mut t.actions))
    }

    fn set_styled(&self, id: TabId, styled: bool) -> Result<(), CoreError> {
        self.with(|t| {
            let tab = t.tabs.get_mut(&id).ok_or(CoreError::TabGone(id))?;
            tab.styled = styled;
            t.actions.push(if styled {
                HostAction::StylesApplied(id)
            } else {
                HostAction::StylesRemoved(id)
            });
            Ok(())
        })
    }
}

impl BrowserHost for MemoryHost {
    fn query_tabs(&self, host: &str) -> Vec<Tab> {
        self.with(|t| {
            t.tabs
                .iter()
                .filter(|(_, tab)| crate::navigation::is_host_url(&tab.url, host))
                .map(|(id, tab)| Tab {
                    id: *id,
                    url: tab.url.clone(),
                })
                .collect()
        })
    }

    fn tab(&self, id: TabId) -> Option<Tab> {
        self.with(|t| {
            t.tabs.get(&id).map(|tab| Tab {
                id,
                url: tab.url.clone(),
            })
        })
    }

    fn redirect(&self, id: TabId, url: &str) -> Result<(), CoreError> {
        self.with(|t| {
            let tab = t.tabs.get_mut(&id).ok_or(CoreError::TabGone(id))?;
            tab.url = url.to_string();
            t.actions.push(HostAction::Redirected {
                tab: id,
                url: url.to_string(),
            });
            Ok(())
        })
    }

    fn apply_limit_styles(&self, id: TabId) -> Result<(), CoreError> {
        self.set_styled(id, true)
    }

    fn remove_limit_styles(&self, id: TabId) -> Result<(), CoreError> {
        self.set_styled(id, false)
    }

    fn resource_url(&self, path: &str) -> String {
        format!("{}/{}", self.origin, path.trim_start_matches('/'))
    }
}
