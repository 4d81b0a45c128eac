//! Structured logging utilities for breakmaps components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//! Everything goes to stderr; stdout belongs to the programs started from the
//! interactive runner.
//!
//! # Usage
//!
//! ```ignore
//! use breakmaps_config::log_descent_error;
//!
//! log_descent_error!("could not mkdir", depth = 1234);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const PREFLIGHT: &'static str = "PREFLIGHT";
    pub const DESCENT: &'static str = "DESCENT";
    pub const UNWIND: &'static str = "UNWIND";
    pub const MAPS: &'static str = "MAPS";
    pub const SHELL: &'static str = "SHELL";
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
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse a configured level name; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

// === PREFLIGHT logging macros ===

#[macro_export]
macro_rules! log_preflight_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::PREFLIGHT, $($key = $value,)* $msg)
    };
}

// === DESCENT logging macros ===

#[macro_export]
macro_rules! log_descent_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::DESCENT, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_descent_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::DESCENT, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_descent_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::DESCENT, $($key = $value,)* $msg)
    };
}

// === UNWIND logging macros ===

#[macro_export]
macro_rules! log_unwind_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::UNWIND, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_unwind_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::UNWIND, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_unwind_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::UNWIND, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_unwind_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::UNWIND, $($key = $value,)* $msg)
    };
}

// === MAPS logging macros ===

#[macro_export]
macro_rules! log_maps_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::MAPS, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_maps_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::MAPS, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_maps_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::MAPS, $($key = $value,)* $msg)
    };
}

// === SHELL logging macros ===

#[macro_export]
macro_rules! log_shell_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::SHELL, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_shell_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::SHELL, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `BREAKMAPS_LOG` wins over `RUST_LOG`, which wins over `level`.
pub fn init_logging(level: LogLevel) {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("BREAKMAPS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}
