//! # camrift-config
//!
//! Configuration management for camrift.
//!
//! Loads configuration from:
//! 1. `~/.camrift/config.toml` (global)
//! 2. the file named by `CAMRIFT_CONFIG` (replaces the global file)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use logging::LogLevel;

/// Explicit config file, replaces `~/.camrift/config.toml`
pub const ENV_CONFIG: &str = "CAMRIFT_CONFIG";
/// `tracing` filter directive, e.g. `camrift=debug`
pub const ENV_LOG: &str = "CAMRIFT_LOG";
pub const ENV_LOG_FILE: &str = "CAMRIFT_LOG_FILE";
/// `path=camera[,path=camera...]`, replaces the device table
pub const ENV_DEVICES: &str = "CAMRIFT_DEVICES";

/// Upper bound on `max_buffers`, the V4L2 `VIDEO_MAX_FRAME`
pub const MAX_BUFFERS: u32 = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("device table error: {0}")]
    Device(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub cameras: Vec<CameraConfig>,
    pub devices: Vec<DeviceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            cameras: vec![CameraConfig::default()],
            devices: vec![DeviceConfig::default()],
        }
    }
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
        let mut config = match explicit.or_else(Self::global_config_path) {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Config::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single config file. Sections missing from the file keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.normalize_device_paths();
        Ok(config)
    }

    /// Global config path: ~/.camrift/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".camrift/config.toml"))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(filter) = lookup(ENV_LOG) {
            self.logging.filter = Some(filter);
        }
        if let Some(file) = lookup(ENV_LOG_FILE) {
            self.logging.file = Some(PathBuf::from(file));
        }
        if let Some(list) = lookup(ENV_DEVICES) {
            self.devices = parse_device_list(&list)?;
        }
        Ok(())
    }

    fn normalize_device_paths(&mut self) {
        for device in &mut self.devices {
            device.path = path::normalize_device_path(&device.path);
        }
    }

    /// Reject device entries that name unknown cameras or repeat a path, and
    /// cameras with an out-of-range buffer limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cameras: HashSet<&str> = self.cameras.iter().map(|c| c.id.as_str()).collect();
        if cameras.len() != self.cameras.len() {
            return Err(ConfigError::Device("duplicate camera id".to_string()));
        }
        if let Some(camera) = self
            .cameras
            .iter()
            .find(|c| !(1..=MAX_BUFFERS).contains(&c.max_buffers))
        {
            return Err(ConfigError::Device(format!(
                "camera {} max_buffers must be between 1 and {}",
                camera.id, MAX_BUFFERS
            )));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !device.path.is_absolute() {
                return Err(ConfigError::Device(format!(
                    "device path {} is not absolute",
                    device.path.display()
                )));
            }
            if !cameras.contains(device.camera.as_str()) {
                return Err(ConfigError::Device(format!(
                    "device {} references unknown camera {}",
                    device.path.display(),
                    device.camera
                )));
            }
            if !seen.insert(device.path.as_path()) {
                return Err(ConfigError::Device(format!(
                    "device {} listed twice",
                    device.path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn camera(&self, id: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id == id)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Parse `CAMRIFT_DEVICES`: comma separated `path=camera` pairs.
pub fn parse_device_list(list: &str) -> Result<Vec<DeviceConfig>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (path, camera) = item
                .split_once('=')
                .ok_or_else(|| ConfigError::Device(format!("expected path=camera, got {item:?}")))?;
            if path.is_empty() || camera.is_empty() {
                return Err(ConfigError::Device(format!("empty field in {item:?}")));
            }
            Ok(DeviceConfig {
                path: path::normalize_device_path(Path::new(path)),
                camera: camera.to_string(),
            })
        })
        .collect()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Full `tracing` filter directive; wins over `level`
    pub filter: Option<String>,
    /// Log file; stderr when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            filter: None,
            file: None,
        }
    }
}

/// A camera exposed by the synthetic backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub max_buffers: u32,
    /// Allow a single open session at a time
    pub exclusive: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: "synthetic0".to_string(),
            name: "Camrift Synthetic Camera".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            max_buffers: 8,
            exclusive: false,
        }
    }
}

/// Emulated device node bound to a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub path: PathBuf,
    pub camera: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/emulated0"),
            camera: "synthetic0".to_string(),
        }
    }
}
