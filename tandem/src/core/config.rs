//! TOML configuration.
//!
//! One file, one table per component. Each component describes its table with
//! a [`Configurable`] type; a missing table yields the type's defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// A typed configuration table.
///
/// ```ignore
/// #[derive(Debug, Deserialize, Default)]
/// pub struct RunnerConfig {
///     pub listen: String,
/// }
///
/// impl Configurable for RunnerConfig {
///     const PREFIX: &'static str = "runner";
/// }
/// ```
pub trait Configurable: DeserializeOwned + Default {
    /// Name of the `[table]` this type is read from
    const PREFIX: &'static str;
}

/// Parsed configuration document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    data: toml::Value,
    path: Option<PathBuf>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl ConfigStore {
    /// Create an empty configuration store
    pub fn empty() -> Self {
        Self {
            data: toml::Value::Table(Default::default()),
            path: None,
        }
    }

    /// Parse a configuration document from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let data = toml::from_str(content).context("invalid TOML configuration")?;
        Ok(Self { data, path: None })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let data = toml::from_str(&content)
            .with_context(|| format!("invalid TOML in '{}'", path.display()))?;

        Ok(Self {
            data,
            path: Some(path.to_path_buf()),
        })
    }

    /// Typed table for `C`, or `C::default()` when the table is absent
    pub fn get<C: Configurable>(&self) -> Result<C> {
        let Some(section) = self.data.get(C::PREFIX) else {
            debug!("Config table [{}] absent, using defaults", C::PREFIX);
            return Ok(C::default());
        };

        section
            .clone()
            .try_into()
            .with_context(|| format!("invalid config table [{}]", C::PREFIX))
    }

    /// Check if a `[table]` exists
    pub fn has_section(&self, prefix: &str) -> bool {
        self.data.get(prefix).is_some()
    }

    /// File this store was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Overlay `other` on top of this document; its values win.
    pub fn merge(&mut self, other: &ConfigStore) {
        overlay(&mut self.data, &other.data);
    }
}

fn overlay(base: &mut toml::Value, top: &toml::Value) {
    match (base, top) {
        (toml::Value::Table(base), toml::Value::Table(top)) => {
            for (key, value) in top {
                match base.get_mut(key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, top) => *base = top.clone(),
    }
}

/// `[websocket]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Multiplexing key; envelopes carrying another key are ignored
    pub key: String,
    /// Heartbeat period in milliseconds; 0 disables the heartbeat
    pub ping_interval_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            ping_interval_ms: 10_000,
        }
    }
}

impl WebSocketConfig {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Heartbeat period, `None` when the heartbeat is disabled
    pub fn ping_interval(&self) -> Option<std::time::Duration> {
        (self.ping_interval_ms > 0)
            .then(|| std::time::Duration::from_millis(self.ping_interval_ms))
    }
}

impl Configurable for WebSocketConfig {
    const PREFIX: &'static str = "websocket";
}
