//! Logging setup
//!
//! Everything logs through `tracing`. The subscriber writes to the server
//! console, to `<logs>/goldhook.log`, or both, depending on [`LogDest`].
//! Plugins share it through [`install_dispatch`].

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::Dispatch;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Log file name inside the logs directory
pub const LOG_FILE_NAME: &str = "goldhook.log";

/// Minimum level of logged messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Where log messages go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDest {
    Console,
    File,
    #[default]
    ConsoleFile,
}

impl LogDest {
    pub fn console(self) -> bool {
        matches!(self, LogDest::Console | LogDest::ConsoleFile)
    }

    pub fn file(self) -> bool {
        matches!(self, LogDest::File | LogDest::ConsoleFile)
    }
}

/// `[logging]` section of the core config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub destination: LogDest,
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. Calling this again after a
/// subscriber is installed does nothing.
pub fn init_logging(config: &LoggingConfig, logs_dir: &Path) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let console = config
        .destination
        .console()
        .then(|| fmt::layer().with_target(false));

    let file = if config.destination.file() {
        std::fs::create_dir_all(logs_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(logs_dir.join(LOG_FILE_NAME))?;
        Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
    } else {
        None
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .is_err()
    {
        tracing::debug!("Logging already initialized");
    }

    Ok(())
}

/// Route this crate copy's `tracing` events to `dispatch`
///
/// A plugin library has its own copy of `tracing` with no subscriber until
/// it installs the host's. Returns false if one was already set.
pub fn install_dispatch(dispatch: &Dispatch) -> bool {
    tracing::dispatcher::set_global_default(dispatch.clone()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }

        let parse = |s: &str| toml::from_str::<Wrapper>(&format!("level = \"{}\"", s)).map(|w| w.level);
        assert_eq!(parse("debug").unwrap(), LogLevel::Debug);
        assert_eq!(parse("warn").unwrap(), LogLevel::Warn);
        assert_eq!(parse("warning").unwrap(), LogLevel::Warn);
        assert_eq!(parse("error").unwrap(), LogLevel::Error);
        assert!(parse("verbose").is_err());
    }

    #[test]
    fn test_log_dest_layers() {
        assert!(LogDest::Console.console() && !LogDest::Console.file());
        assert!(!LogDest::File.console() && LogDest::File.file());
        assert!(LogDest::ConsoleFile.console() && LogDest::ConsoleFile.file());
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
        assert_eq!(LogLevel::default().as_directive(), "info");
    }
}
