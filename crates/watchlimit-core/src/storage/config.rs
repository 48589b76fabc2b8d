//! TOML-based application configuration.
//!
//! Stores:
//! - Daily limit and bank capacity
//! - Overlay countdown and debounce timings
//! - Navigation targets (block page, home page, watched host)
//!
//! Configuration is stored at `~/.config/watchlimit/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;

/// Capacity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: usize,
    #[serde(default = "default_bank_capacity")]
    pub bank_capacity: usize,
}

/// Decision overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Countdown length in one-second ticks.
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u32,
    /// Delay before querying, so the page can render its title.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_exit_animation_ms")]
    pub exit_animation_ms: u64,
}

/// Navigation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Bundled page shown instead of a blocked video.
    #[serde(default = "default_block_page")]
    pub block_page: String,
    /// Where "skip" sends the tab.
    #[serde(default = "default_home_url")]
    pub home_url: String,
    /// Host suffix whose tabs are watched and styled.
    #[serde(default = "default_host")]
    pub host: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/watchlimit/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
}

/// Hard ceiling on videos counted per day.
pub const MAX_DAILY_LIMIT: usize = 5;
/// Hard ceiling on banked videos.
pub const MAX_BANK_CAPACITY: usize = 3;

// Default functions
fn default_daily_limit() -> usize {
    MAX_DAILY_LIMIT
}
fn default_bank_capacity() -> usize {
    MAX_BANK_CAPACITY
}
fn default_countdown_secs() -> u32 {
    10
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_exit_animation_ms() -> u64 {
    300
}
fn default_block_page() -> String {
    "block.html".into()
}
fn default_home_url() -> String {
    "https://www.youtube.com".into()
}
fn default_host() -> String {
    "youtube.com".into()
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            bank_capacity: default_bank_capacity(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            countdown_secs: default_countdown_secs(),
            debounce_ms: default_debounce_ms(),
            exit_animation_ms: default_exit_animation_ms(),
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            block_page: default_block_page(),
            home_url: default_home_url(),
            host: default_host(),
        }
    }
}

impl LimitsConfig {
    /// Both caps may be lowered, never raised or zeroed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first field out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DAILY_LIMIT).contains(&self.daily_limit) {
            return Err(ConfigError::InvalidValue {
                key: "limits.daily_limit".into(),
                message: format!("must be between 1 and {MAX_DAILY_LIMIT}, got {}", self.daily_limit),
            });
        }
        if !(1..=MAX_BANK_CAPACITY).contains(&self.bank_capacity) {
            return Err(ConfigError::InvalidValue {
                key: "limits.bank_capacity".into(),
                message: format!("must be between 1 and {MAX_BANK_CAPACITY}, got {}", self.bank_capacity),
            });
        }
        Ok(())
    }
}

impl OverlayConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn exit_animation(&self) -> Duration {
        Duration::from_millis(self.exit_animation_ms)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let (parent, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        if let Some(parent) = parent {
            for part in parent.split('.') {
                current = current.get_mut(part).ok_or_else(unknown)?;
            }
        }

        let obj = current.as_object_mut().ok_or_else(unknown)?;
        let existing = obj.get(leaf).ok_or_else(unknown)?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value
                    .parse::<bool>()
                    .map_err(|_| invalid(format!("cannot parse '{value}' as bool")))?,
            ),
            serde_json::Value::Number(_) => {
                let n = value
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                serde_json::Value::Number(n.into())
            }
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                return Err(invalid("cannot set a whole section".into()));
            }
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or write and return the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: Self = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path,
                    message: e.to_string(),
                })?;
                cfg.limits.validate()?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key and persist. The new value must parse as
    /// the type of the value it replaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.limits.validate()?;
        *self = updated;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default config");
            Self::default()
        })
    }
}
