//! Demo settings with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `LOOM_*` environment variable overrides
//!
//! Command-line flags are applied last by `main`.

use std::path::{Path, PathBuf};

use loom_server::LoomConfig;
use loom_server::client::parse_flag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// All demo settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Router configuration.
    pub loom: LoomConfig,
    /// Log output.
    pub logging: LoggingSettings,
    /// Demo behaviour.
    pub demo: DemoSettings,
}

/// The demo page shipped with this crate, independent of the working directory.
const DEFAULT_STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 picks a free port).
    pub port: u16,
    /// Directory served at `/`.
    pub static_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Demo behaviour settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Seconds between `tick` broadcasts. 0 disables the ticker.
    pub tick_interval_secs: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
        }
    }
}

/// Load settings from `path` (if any) with environment overrides.
///
/// A missing file yields defaults; an unreadable or invalid one is an error.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = load_settings_file(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn load_settings_file(path: Option<&Path>) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    Ok(serde_json::from_value(merged)?)
}

/// Overlay `source` on `target`.
///
/// Nested objects merge key by key, so a file only needs the keys it
/// changes. Any other value in `source` replaces the one in `target`, except
/// `null`, which leaves the target key alone.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut merged), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let value = match merged.remove(&key) {
                    Some(base) => deep_merge(base, value),
                    None => value,
                };
                let _ = merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, source) => source,
    }
}

/// Apply `LOOM_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored.
pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("LOOM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("LOOM_PORT") {
        match v.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => warn!(key = "LOOM_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("LOOM_STATIC_DIR") {
        settings.server.static_dir = PathBuf::from(v);
    }
    if let Some(v) = read("LOOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("LOOM_LOG_JSON") {
        match parse_flag(&v) {
            Some(json) => settings.logging.json = json,
            None => warn!(key = "LOOM_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
