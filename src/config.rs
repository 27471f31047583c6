// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Process-wide configuration toggles.
//!
//! Values are layered: compiled defaults, then an optional TOML file named by
//! `MSG_SOURCE_CONFIG`, then `MSG_SOURCE_*` environment variables. Invalid
//! values fall back to the lower layer without crashing.
//!
//! The process configuration is resolved exactly once (see
//! [`ProcessConfig::global`]) and handed to registries and managers as an
//! `Arc`, so no manager ever re-derives it.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MSG_SOURCE_CONNECTIONS_ARE_POOLED` | false | One connection per session instead of one per manager |
//! | `MSG_SOURCE_SESSIONS_ARE_POOLED` | false | Reserved for session-level pooling policy |
//! | `MSG_SOURCE_USE_SINGLE_DYNAMIC_REPLY_QUEUE` | true | Share one temporary reply queue per manager |
//! | `MSG_SOURCE_CLEANUP_ON_CLOSE` | true | Tear down when the reference count reaches the threshold |
//! | `MSG_SOURCE_CLEANUP_THRESHOLD` | 0 | Reference count at or below which close tears down |
//! | `MSG_SOURCE_CONFIG` | unset | Path to a TOML file with the same keys |

use std::path::Path;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_PATH_KEY: &str = "MSG_SOURCE_CONFIG";
pub const CONNECTIONS_ARE_POOLED_KEY: &str = "MSG_SOURCE_CONNECTIONS_ARE_POOLED";
pub const SESSIONS_ARE_POOLED_KEY: &str = "MSG_SOURCE_SESSIONS_ARE_POOLED";
pub const USE_SINGLE_DYNAMIC_REPLY_QUEUE_KEY: &str = "MSG_SOURCE_USE_SINGLE_DYNAMIC_REPLY_QUEUE";
pub const CLEANUP_ON_CLOSE_KEY: &str = "MSG_SOURCE_CLEANUP_ON_CLOSE";
pub const CLEANUP_THRESHOLD_KEY: &str = "MSG_SOURCE_CLEANUP_THRESHOLD";

static GLOBAL: OnceLock<Arc<ProcessConfig>> = OnceLock::new();

/// Errors reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid config file: {0}")]
    Parse(String),
}

/// Pooling and cleanup policy shared by every manager in the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProcessConfig {
    pub connections_are_pooled: bool,
    pub sessions_are_pooled: bool,
    pub use_single_dynamic_reply_queue: bool,
    pub cleanup_on_close: bool,
    pub cleanup_threshold: i64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            connections_are_pooled: false,
            sessions_are_pooled: false,
            use_single_dynamic_reply_queue: true,
            cleanup_on_close: true,
            cleanup_threshold: 0,
        }
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub connections_are_pooled: bool,
    pub sessions_are_pooled: bool,
    pub use_single_dynamic_reply_queue: bool,
    pub effective_single_dynamic_reply_queue: bool,
    pub cleanup_on_close: bool,
    pub cleanup_threshold: i64,
    pub config_file: Option<String>,
}

impl ProcessConfig {
    /// The process-wide configuration, resolved on first access.
    ///
    /// Concurrent first readers block on the same initialization; every
    /// later call returns the cached value.
    pub fn global() -> Arc<ProcessConfig> {
        GLOBAL
            .get_or_init(|| {
                let config = load();
                tracing::debug!(?config, "resolved process configuration");
                Arc::new(config)
            })
            .clone()
    }

    /// Parse a TOML document over the compiled defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a TOML file over the compiled defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Whether a single temporary reply queue is shared by all callers.
    ///
    /// Temporary queues belong to the connection that created them, so
    /// pooled connections always get a queue per call.
    pub fn effective_use_single_dynamic_reply_queue(&self) -> bool {
        !self.connections_are_pooled && self.use_single_dynamic_reply_queue
    }

    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            connections_are_pooled: self.connections_are_pooled,
            sessions_are_pooled: self.sessions_are_pooled,
            use_single_dynamic_reply_queue: self.use_single_dynamic_reply_queue,
            effective_single_dynamic_reply_queue: self.effective_use_single_dynamic_reply_queue(),
            cleanup_on_close: self.cleanup_on_close,
            cleanup_threshold: self.cleanup_threshold,
            config_file: std::env::var(CONFIG_PATH_KEY).ok(),
        }
    }
}

/// Parse a boolean env var, returning `default` on missing or invalid.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                tracing::warn!(key, value = %val, "invalid boolean, using {}", default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse an `i64` env var, returning `default` on missing or invalid.
fn parse_i64(key: &str, default: i64) -> i64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<i64>().unwrap_or_else(|_| {
            tracing::warn!(key, value = %val, "invalid integer, using {}", default);
            default
        }),
        Err(_) => default,
    }
}

/// Load the file layer, if one is configured and readable.
fn load_file_layer() -> ProcessConfig {
    let Ok(path) = std::env::var(CONFIG_PATH_KEY) else {
        return ProcessConfig::default();
    };
    match ProcessConfig::from_file(Path::new(&path)) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring config file");
            ProcessConfig::default()
        }
    }
}

/// Load configuration from all layers without caching.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> ProcessConfig {
    let base = load_file_layer();
    ProcessConfig {
        connections_are_pooled: parse_bool(CONNECTIONS_ARE_POOLED_KEY, base.connections_are_pooled),
        sessions_are_pooled: parse_bool(SESSIONS_ARE_POOLED_KEY, base.sessions_are_pooled),
        use_single_dynamic_reply_queue: parse_bool(
            USE_SINGLE_DYNAMIC_REPLY_QUEUE_KEY,
            base.use_single_dynamic_reply_queue,
        ),
        cleanup_on_close: parse_bool(CLEANUP_ON_CLOSE_KEY, base.cleanup_on_close),
        cleanup_threshold: parse_i64(CLEANUP_THRESHOLD_KEY, base.cleanup_threshold),
    }
}
