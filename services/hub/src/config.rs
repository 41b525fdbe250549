//! Hub configuration loading.
//!
//! TOML is the sole config source; CLI flags override individual fields.
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! # Fields
//! - `reply_bind`: reply-channel listen address, default `127.0.0.1:0`
//! - `events_bind`: events-channel listen address, default `127.0.0.1:0`
//! - `event_capacity`: publish-channel depth per subscriber before a slow
//!   subscriber is disconnected, default 1024

use serde::Deserialize;
use std::path::Path;

/// Resolved hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub reply_bind: String,
    pub events_bind: String,
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            reply_bind: "127.0.0.1:0".to_owned(),
            events_bind: "127.0.0.1:0".to_owned(),
            event_capacity: 1024,
        }
    }
}

/// Raw TOML shape (all fields optional).
#[derive(Debug, Deserialize)]
struct RawConfig {
    reply_bind: Option<String>,
    events_bind: Option<String>,
    event_capacity: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("event_capacity must be at least 1")]
    ZeroCapacity,
}

impl HubConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let defaults = HubConfig::default();
        let config = HubConfig {
            reply_bind: raw.reply_bind.unwrap_or(defaults.reply_bind),
            events_bind: raw.events_bind.unwrap_or(defaults.events_bind),
            event_capacity: raw.event_capacity.unwrap_or(defaults.event_capacity),
        };
        if config.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(config)
    }
}
