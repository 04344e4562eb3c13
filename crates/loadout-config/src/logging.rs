//! Structured logging utilities for Loadout components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use loadout_config::{log_cas_debug, log_workspace_info};
//!
//! log_cas_debug!("Object stored", hash = %hash);
//! log_workspace_info!("Workspace ready", id = %id, files = 120);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CAS: &'static str = "CAS";
    pub const WORKSPACE: &'static str = "WORKSPACE";
    pub const MANIFEST: &'static str = "MANIFEST";
    pub const MAINTENANCE: &'static str = "MAINTENANCE";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count onto a level, starting from `Warn`.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === CAS logging macros ===

#[macro_export]
macro_rules! log_cas_error {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::error!(component = "CAS", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_cas_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "CAS", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_cas_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = "CAS", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_cas_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "CAS", $($($field)+,)? $msg)
    };
}

// === WORKSPACE logging macros ===

#[macro_export]
macro_rules! log_workspace_error {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::error!(component = "WORKSPACE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_workspace_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "WORKSPACE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_workspace_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = "WORKSPACE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_workspace_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "WORKSPACE", $($($field)+,)? $msg)
    };
}

// === MAINTENANCE logging macros ===

#[macro_export]
macro_rules! log_maintenance_error {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::error!(component = "MAINTENANCE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_maintenance_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "MAINTENANCE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_maintenance_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = "MAINTENANCE", $($($field)+,)? $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "CLI", $($($field)+,)? $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `LOADOUT_LOG` takes precedence over `RUST_LOG`; both override `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("LOADOUT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::CAS, "CAS");
        assert_eq!(Component::WORKSPACE, "WORKSPACE");
        assert_eq!(Component::MAINTENANCE, "MAINTENANCE");
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(2), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(9), LogLevel::Trace);
    }

    #[test]
    fn test_macros_expand() {
        let hash = "ab";
        log_cas_debug!("plain");
        log_cas_debug!("with fields", hash = %hash, count = 3);
        log_workspace_info!("shorthand", hash);
    }
}
