//! Logging configuration table and tracing setup
//!
//! The table mirrors a classic dict-style logging config: one formatter,
//! one console handler, and two named loggers (the application logger and
//! the HTTP server logger), all at `LOG_LEVEL`. It is produced exactly once
//! per process by [`init`] and then translated into a `tracing-subscriber`
//! fmt subscriber with an `EnvFilter` built from the loggers.
//!
//! `RUST_LOG`, when set and valid, replaces the derived filter.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

/// Formatter name used by the console handler
pub const DEFAULT_FORMATTER: &str = "default";
/// Handler name both loggers route to
pub const CONSOLE_HANDLER: &str = "console";
/// Application logger name
pub const APP_LOGGER: &str = "app_logger";
/// HTTP server logger name
pub const HTTP_LOGGER: &str = "http";

/// Level for targets not named by any logger
const FALLBACK_LEVEL: LogLevel = LogLevel::Warn;

/// Crate targets owned by the application logger
const APP_TARGETS: &[&str] = &["pgsession", "pgsession_core", "pgsession_server"];
/// Targets owned by the HTTP server logger
const HTTP_TARGETS: &[&str] = &["tower_http", "axum", "hyper"];

static LOGGING: OnceCell<LoggingConfig> = OnceCell::new();

/// Logging setup error
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unknown log level '{0}'")]
    UnknownLevel(String),

    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Log level, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive form understood by `EnvFilter`
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    /// Accepts both tracing and Python-style level names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "NOTSET" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" | "CRITICAL" | "FATAL" => Ok(Self::Error),
            _ => Err(LoggingError::UnknownLevel(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

/// Output layout of a log line.
///
/// Field order: timestamp, level, target, message, file, line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatterConfig {
    /// strftime pattern for the timestamp
    pub datefmt: String,
    pub with_level: bool,
    pub with_target: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stderr,
    Stdout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerConfig {
    pub stream: Stream,
    pub formatter: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggerConfig {
    pub handlers: Vec<String>,
    pub level: LogLevel,
    /// tracing targets this logger covers
    pub targets: Vec<String>,
}

/// The process logging table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub version: u32,
    pub disable_existing_loggers: bool,
    pub formatters: BTreeMap<String, FormatterConfig>,
    pub handlers: BTreeMap<String, HandlerConfig>,
    pub loggers: BTreeMap<String, LoggerConfig>,
}

impl LoggingConfig {
    /// Build the table from `LOG_LEVEL` and `LOGGER_NAME`.
    ///
    /// The two loggers are always keyed `app_logger` and `http`;
    /// `LOGGER_NAME` only adds a target to the application logger.
    pub fn from_settings(settings: &Settings) -> Result<Self, LoggingError> {
        let level: LogLevel = settings.log_level.parse()?;

        let formatters = BTreeMap::from([(
            DEFAULT_FORMATTER.to_string(),
            FormatterConfig {
                datefmt: "%Y-%m-%d %H:%M:%S".to_string(),
                with_level: true,
                with_target: true,
                with_file: true,
                with_line_number: true,
            },
        )]);

        let handlers = BTreeMap::from([(
            CONSOLE_HANDLER.to_string(),
            HandlerConfig {
                stream: Stream::Stderr,
                formatter: DEFAULT_FORMATTER.to_string(),
                level,
            },
        )]);

        let mut app_targets: Vec<String> = std::iter::once(APP_LOGGER)
            .chain(APP_TARGETS.iter().copied())
            .map(String::from)
            .collect();
        let custom = settings.logger_name.trim();
        if !custom.is_empty() && !app_targets.iter().any(|t| t == custom) {
            app_targets.push(custom.to_string());
        }

        let loggers = BTreeMap::from([
            (
                APP_LOGGER.to_string(),
                LoggerConfig {
                    handlers: vec![CONSOLE_HANDLER.to_string()],
                    level,
                    targets: app_targets,
                },
            ),
            (
                HTTP_LOGGER.to_string(),
                LoggerConfig {
                    handlers: vec![CONSOLE_HANDLER.to_string()],
                    level,
                    targets: HTTP_TARGETS.iter().map(|t| t.to_string()).collect(),
                },
            ),
        ]);

        Ok(Self {
            version: 1,
            disable_existing_loggers: false,
            formatters,
            handlers,
            loggers,
        })
    }

    /// Effective level of a logger: the stricter of its own level and the
    /// levels of the handlers it routes to.
    pub fn effective_level(&self, logger: &LoggerConfig) -> LogLevel {
        logger
            .handlers
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|handler| handler.level)
            .fold(logger.level, LogLevel::max)
    }

    /// `EnvFilter` directives derived from the loggers.
    pub fn directives(&self) -> String {
        let mut directives = vec![FALLBACK_LEVEL.as_directive().to_string()];
        for logger in self.loggers.values() {
            let level = self.effective_level(logger);
            directives.extend(logger.targets.iter().map(|t| format!("{}={}", t, level)));
        }
        directives.join(",")
    }

    fn formatter(&self) -> Option<&FormatterConfig> {
        self.handlers
            .get(CONSOLE_HANDLER)
            .and_then(|handler| self.formatters.get(&handler.formatter))
    }

    /// Install the global tracing subscriber described by this table.
    pub fn install(&self) -> Result<(), LoggingError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.directives())?,
        };

        let formatter = self.formatter().cloned().unwrap_or(FormatterConfig {
            datefmt: "%Y-%m-%d %H:%M:%S".to_string(),
            with_level: true,
            with_target: true,
            with_file: false,
            with_line_number: false,
        });

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new(formatter.datefmt))
            .with_level(formatter.with_level)
            .with_target(formatter.with_target)
            .with_file(formatter.with_file)
            .with_line_number(formatter.with_line_number);

        let stream = self
            .handlers
            .get(CONSOLE_HANDLER)
            .map(|handler| handler.stream)
            .unwrap_or(Stream::Stderr);

        let result = match stream {
            Stream::Stderr => builder.with_writer(std::io::stderr).try_init(),
            Stream::Stdout => builder.with_writer(std::io::stdout).try_init(),
        };

        result.map_err(|err| LoggingError::Init(err.to_string()))
    }
}

/// Produce the logging table for this process and install tracing.
///
/// Only the first call builds and installs; later calls return the table
/// produced by the first one regardless of the settings passed.
pub fn init(settings: &Settings) -> Result<&'static LoggingConfig, LoggingError> {
    LOGGING.get_or_try_init(|| {
        let config = LoggingConfig::from_settings(settings)?;
        config.install()?;
        tracing::debug!(directives = %config.directives(), "logging initialized");
        Ok(config)
    })
}

/// The logging table, if [`init`] has run.
pub fn config() -> Option<&'static LoggingConfig> {
    LOGGING.get()
}
