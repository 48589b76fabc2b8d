mod backend;
mod config;
pub mod database;
mod store;

pub use backend::{KvBackend, MemoryBackend};
pub use config::{
    Config, LimitsConfig, NavigationConfig, OverlayConfig, MAX_BANK_CAPACITY, MAX_DAILY_LIMIT,
};
pub use database::SqliteBackend;
pub use store::{Batch, StateChange, StateKey, Store};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/watchlimit[-dev]/` based on WATCHLIMIT_ENV.
///
/// Set WATCHLIMIT_ENV=dev to use development data directory, or
/// WATCHLIMIT_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("WATCHLIMIT_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("WATCHLIMIT_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("watchlimit-dev")
            } else {
                base_dir.join("watchlimit")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::DataDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}
