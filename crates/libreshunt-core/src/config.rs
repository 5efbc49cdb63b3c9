//! Application configuration
//!
//! Loaded from `app-config.json`: an explicit path wins, then the working
//! directory, then the per-user config directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::protocol::{ProtocolError, DEFAULT_TIMEOUT_MS};

/// Configuration file name
pub const CONFIG_FILE: &str = "app-config.json";

fn default_max_retries() -> u32 {
    3
}

fn default_compression() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_serial_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_recording_path() -> String {
    "telemetry.log".to_string()
}

/// Settings consumed by the facade and engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Priority assigned to commands that do not ask for one (0 or 1)
    #[serde(default)]
    pub default_priority: u8,

    /// Retry budget for commands that do not ask for one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Collapse repeated writes of the same register onto the queue tail
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// Command response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub cmd_response_timeout_ms: u64,

    /// Serial device path
    #[serde(default = "default_serial_device")]
    pub serial_device: String,

    /// Record every raw line to `recording_path`
    #[serde(default)]
    pub recording: bool,

    /// Raw line recording target
    #[serde(default = "default_recording_path")]
    pub recording_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_priority: 0,
            default_max_retries: default_max_retries(),
            compression: default_compression(),
            cmd_response_timeout_ms: default_timeout_ms(),
            serial_device: default_serial_device(),
            recording: false,
            recording_path: default_recording_path(),
        }
    }
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| ProtocolError::ConfigError(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// Load from the first config file found, or fall back to defaults.
    pub fn load() -> Self {
        for candidate in Self::candidate_paths() {
            if candidate.is_file() {
                match Self::from_file(&candidate) {
                    Ok(cfg) => {
                        eprintln!("[INFO] config: loaded {}", candidate.display());
                        return cfg;
                    }
                    Err(e) => {
                        eprintln!("[WARN] config: {} unusable: {}", candidate.display(), e);
                    }
                }
            }
        }
        eprintln!("[INFO] config: no {} found, using defaults", CONFIG_FILE);
        Self::default()
    }

    /// Write the configuration to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(base) = dirs::config_dir() {
            paths.push(base.join("libreshunt").join(CONFIG_FILE));
        }
        paths
    }
}
