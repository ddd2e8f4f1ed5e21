//! Konfiguration - Datei im App-Config-Verzeichnis plus Env-Overrides
//!
//! Reihenfolge: Defaults → `config.json` → Umgebungsvariablen.

use crate::call_engine::{AudioFormat, DeviceKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const ENV_DEVICE: &str = "PHONE_CALLS_DEVICE";
pub const ENV_LOG: &str = "PHONE_CALLS_LOG";
pub const ENV_MEDIA_BLOCKS: &str = "PHONE_CALLS_MEDIA_BLOCKS";

const CONFIG_FILE: &str = "config.json";

/// Standard-Log-Filter
pub const DEFAULT_LOG_FILTER: &str = "phone_calls_lib=debug";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhoneCallsConfig {
    /// Audio-Gerät unter der Bridge
    pub device: DeviceKind,
    /// Größe der Media-Ringpuffer in Callback-Blöcken
    pub media_buffer_blocks: usize,
    /// Vorab allokierte Telemetrie-Puffer
    pub telemetry_pool_frames: usize,
    /// Audio-Frames die beim Host anstehen dürfen
    pub telemetry_queue_frames: usize,
    pub log_filter: String,
}

impl Default for PhoneCallsConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::Hardware,
            media_buffer_blocks: 8,
            telemetry_pool_frames: 64,
            telemetry_queue_frames: 32,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl PhoneCallsConfig {
    /// Lädt die Konfiguration aus dem App-Config-Verzeichnis und der Umgebung
    pub fn load() -> Result<Self, ConfigError> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Pfad der Konfigurationsdatei
    pub fn default_path() -> Option<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("com", "omi", "phone-calls")?;
        Some(proj_dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Wendet Overrides aus `lookup` an (im Betrieb: Umgebungsvariablen)
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_DEVICE) {
            self.device = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_DEVICE,
                value,
            })?;
        }

        if let Some(value) = lookup(ENV_LOG) {
            self.log_filter = value;
        }

        if let Some(value) = lookup(ENV_MEDIA_BLOCKS) {
            self.media_buffer_blocks = match value.trim().parse::<usize>() {
                Ok(blocks) if blocks > 0 => blocks,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: ENV_MEDIA_BLOCKS,
                        value,
                    })
                }
            };
        }

        Ok(self)
    }

    /// Ringpuffer-Größe pro Richtung in Bytes
    pub fn media_capacity_bytes(&self) -> usize {
        self.media_buffer_blocks.max(1) * AudioFormat::VOICE.block_bytes()
    }
}

// ============================================================================
// TESTS
// ============================================================================
