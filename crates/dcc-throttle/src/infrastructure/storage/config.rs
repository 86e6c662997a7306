//! TOML-based configuration persistence for the throttle backend.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\DCCThrottle\config.toml`
//! - Linux:    `~/.config/dccthrottle/config.toml`
//! - macOS:    `~/Library/Application Support/DCCThrottle/config.toml`
//!
//! # Layout of the file (for beginners)
//!
//! ```toml
//! [station]
//! log_level = "info"
//!
//! [interface]
//! kind = "nce-usb"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [discovery]
//! poll_interval_ms = 2000
//!
//! [[decoders]]
//! name = "Sound Steam"
//! functions = [
//!     { index = 0, name = "Headlight" },
//!     { index = 2, name = "Whistle", action = "momentary" },
//! ]
//!
//! [[locomotives]]
//! name = "Mikado 4501"
//! address = 4501
//! decoder = "Sound Steam"
//! ```
//!
//! Every section and almost every field may be left out; `#[serde(default)]`
//! fills in the gaps, so an old or hand-written file keeps loading as new
//! fields are added.  Locomotives name their decoder by `name`; a name that
//! matches no `[[decoders]]` entry is treated as "unknown decoder" (every
//! function toggles).

use std::path::{Path, PathBuf};
use std::time::Duration;

use dcc_core::{Address, DecoderDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::application::throttle_registry::{LocomotiveId, RosterEntry};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub interface: InterfaceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub decoders: Vec<DecoderDefinition>,
    #[serde(default)]
    pub locomotives: Vec<LocomotiveEntry>,
    #[serde(default)]
    pub consists: Vec<ConsistEntry>,
}

/// General backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    /// Schema version string – bump when breaking changes are introduced.
    #[serde(default = "default_version")]
    pub version: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which command-station interface to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceKind {
    /// NCE USB interface on a serial port.
    #[default]
    NceUsb,
    /// No hardware: commands update throttle state only.
    Offline,
}

/// Command-station interface settings.  The only section the backend writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceConfig {
    #[serde(default)]
    pub kind: InterfaceKind,
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`.  `None` until chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// How long a request waits for the station's reply.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl InterfaceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Port discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// How often the port list is re-checked.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A rostered locomotive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocomotiveEntry {
    /// Generated on first load when the file omits it.
    #[serde(default = "Uuid::new_v4")]
    pub id: LocomotiveId,
    pub name: String,
    pub address: Address,
    /// Name of a `[[decoders]]` entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoder: Option<String>,
}

/// A consist: several locomotives answering to one consist address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsistEntry {
    #[serde(default = "Uuid::new_v4")]
    pub id: LocomotiveId,
    pub name: String,
    pub address: Address,
    #[serde(default)]
    pub members: Vec<LocomotiveId>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_version() -> String {
    "1.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_baud_rate() -> u32 {
    crate::infrastructure::serial::DEFAULT_BAUD_RATE
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            log_level: default_log_level(),
        }
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            kind: InterfaceKind::default(),
            port: None,
            baud_rate: default_baud_rate(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Builds the throttle roster: locomotives with their decoder resolved,
    /// followed by consists (which have no decoder).
    pub fn roster(&self) -> Vec<RosterEntry> {
        let locomotives = self.locomotives.iter().map(|loco| {
            let decoder = loco.decoder.as_deref().and_then(|name| {
                let found = self.decoders.iter().find(|d| d.name == name).cloned();
                if found.is_none() {
                    warn!(locomotive = %loco.name, decoder = name, "unknown decoder");
                }
                found
            });
            RosterEntry {
                id: loco.id,
                name: loco.name.clone(),
                address: loco.address,
                decoder,
            }
        });
        let consists = self.consists.iter().map(|consist| RosterEntry {
            id: consist.id,
            name: consist.name.clone(),
            address: consist.address,
            decoder: None,
        });
        locomotives.chain(consists).collect()
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_at(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_at(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config directory, including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("DCCThrottle"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("dccthrottle"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("DCCThrottle")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
