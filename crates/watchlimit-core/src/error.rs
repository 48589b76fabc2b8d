//! Core error types for watchlimit-core.
//!
//! Nothing here is fatal to the process. Callers absorb these locally:
//! storage failures fail open (no overlay, no redirect), a vanished tab is
//! skipped and a URL without a video id is ignored.

use std::path::PathBuf;
use thiserror::Error;

use crate::browser::TabId;

/// Core error type for watchlimit-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The target tab closed before the operation completed
    #[error("Tab {0} is gone")]
    TabGone(TabId),

    /// No video id could be extracted from the URL
    #[error("No video id in URL: {url}")]
    MalformedUrl { url: String },
}

/// Key/value storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The storage context was invalidated mid-call
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Failed to open the backing database
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored value did not have the expected shape
    #[error("Stored value for '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be created
    #[error("Cannot prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_subject() {
        let err = CoreError::MalformedUrl {
            url: "https://www.youtube.com/watch".into(),
        };
        assert_eq!(err.to_string(), "No video id in URL: https://www.youtube.com/watch");
        assert_eq!(CoreError::TabGone(TabId(7)).to_string(), "Tab 7 is gone");
    }
}
