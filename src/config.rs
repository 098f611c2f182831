//! Centralized runtime constants and the file-backed server configuration.
//!
//! Tunable intervals and defaults are collected here so they can be found and
//! adjusted in a single place rather than scattered across modules.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::GateError;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "TRACKGATE_CONFIG";

/// Rolling limit interval used when a transport record leaves it unset (minutes).
pub const DEFAULT_LIMIT_INTERVAL_MINUTES: u32 = 60;

/// Interval at which dirty transport profiles are written back to the directory (seconds).
pub const FLUSH_INTERVAL_SECS: u64 = 30;

/// How long a command dispatch may take end to end before it counts as failed (milliseconds).
pub const DISPATCH_TIMEOUT_MS: u64 = 5_000;

/// Global ceiling on outbound device commands (commands/sec).
pub const DISPATCH_MAX_PER_SEC: u32 = 10;

/// Default SQLite file for the accounting store and transport directory.
pub const DEFAULT_DATABASE_PATH: &str = "trackgate.db";

/// Where the device command server listens.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub host: String,
    /// 0 disables command dispatch entirely.
    pub port: u16,
    pub timeout_ms: u64,
    pub max_commands_per_sec: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            timeout_ms: DISPATCH_TIMEOUT_MS,
            max_commands_per_sec: DISPATCH_MAX_PER_SEC,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub database_path: PathBuf,
    pub flush_interval_secs: u64,
    pub dispatch: DispatchConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            flush_interval_secs: FLUSH_INTERVAL_SECS,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl GateConfig {
    /// Parse and validate a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, GateError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, GateError> {
        let config: GateConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `TRACKGATE_CONFIG`, or fall back to defaults.
    pub fn load() -> Result<Self, GateError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => {
                tracing::info!("{CONFIG_ENV_VAR} not set, using default configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), GateError> {
        if self.flush_interval_secs == 0 {
            return Err(GateError::Config("flush_interval_secs must be positive".into()));
        }
        if self.dispatch.timeout_ms == 0 {
            return Err(GateError::Config("dispatch.timeout_ms must be positive".into()));
        }
        if self.dispatch.max_commands_per_sec == 0 {
            return Err(GateError::Config(
                "dispatch.max_commands_per_sec must be positive".into(),
            ));
        }
        Ok(())
    }
}
