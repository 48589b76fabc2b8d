pub mod config;
pub mod video;
pub mod visit;

use std::sync::Arc;

use watchlimit_core::{Background, Config, CoreError, LimitEngine, SqliteBackend, Store, SystemClock};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Everything a command needs, wired to the on-disk store.
pub struct App {
    pub config: Config,
    pub background: Background,
}

impl App {
    pub fn open() -> Result<Self, CoreError> {
        let config = Config::load_or_default();
        tracing::debug!(
            daily_limit = config.limits.daily_limit,
            bank_capacity = config.limits.bank_capacity,
            "opening store"
        );
        let store = Store::new(SqliteBackend::open()?);
        let engine = LimitEngine::new(store, Arc::new(SystemClock), config.limits.clone());
        Ok(Self {
            config,
            background: Background::new(engine),
        })
    }

    pub fn engine(&self) -> &LimitEngine {
        self.background.engine()
    }
}
