//! Structured logging utilities for camrift components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use camrift_config::log_shim_debug;
//!
//! log_shim_debug!(fd, path = %path.display(), "emulated open");
//! ```

use crate::LoggingConfig;
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const SHIM: &'static str = "SHIM";
    pub const REGISTRY: &'static str = "REGISTRY";
    pub const BACKEND: &'static str = "BACKEND";
    pub const CONFIG: &'static str = "CONFIG";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === SHIM logging macros ===

#[macro_export]
macro_rules! log_shim_error {
    ($($arg:tt)+) => {
        tracing::error!(component = $crate::logging::Component::SHIM, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_shim_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::SHIM, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_shim_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::SHIM, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_shim_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::SHIM, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_shim_trace {
    ($($arg:tt)+) => {
        tracing::trace!(component = $crate::logging::Component::SHIM, $($arg)+)
    };
}

// === REGISTRY logging macros ===

#[macro_export]
macro_rules! log_registry_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::REGISTRY, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_registry_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::REGISTRY, $($arg)+)
    };
}

// === BACKEND logging macros ===

#[macro_export]
macro_rules! log_backend_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::BACKEND, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_backend_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::BACKEND, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_backend_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::BACKEND, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_backend_trace {
    ($($arg:tt)+) => {
        tracing::trace!(component = $crate::logging::Component::BACKEND, $($arg)+)
    };
}

// === CONFIG logging macros ===

#[macro_export]
macro_rules! log_config_error {
    ($($arg:tt)+) => {
        tracing::error!(component = $crate::logging::Component::CONFIG, $($arg)+)
    };
}

/// Build the filter: explicit directive first, then the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    config
        .filter
        .as_deref()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(config.level.as_str()))
}

/// Install the global subscriber. Returns false when one is already set
/// (the host process may bring its own).
///
/// File output goes through a synchronous appender: the shim can be loaded
/// into processes that fork, and a background writer thread would not follow.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(false);

    let appender = config.file.as_deref().and_then(|path| {
        let dir = path.parent()?;
        let name = path.file_name()?.to_str()?;
        RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(dir)
            .ok()
    });

    let result = match appender {
        Some(appender) => builder.with_ansi(false).with_writer(appender).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    result.is_ok()
}
