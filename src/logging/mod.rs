//! Logger setup of the `stgplan` binary.
//!
//! Records go to stderr through `env_logger` at the verbosity chosen on the
//! command line and, if requested, to a JSON lines file at trace level.

use std::path::Path;

use anyhow::{Context, Error};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

mod json_log;
mod multilog;

pub use json_log::JsonFileLog;
pub use multilog::MultiLogger;

/// Log targets that are too chatty below debug level.
const QUIET_TARGETS: [&str; 1] = ["osutils::dependencies"];

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    pub level: Level,
    pub message: String,
    pub target: String,
    pub module: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl From<log::Level> for Level {
    fn from(value: log::Level) -> Self {
        match value {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug => Level::Debug,
            log::Level::Trace => Level::Trace,
        }
    }
}

impl From<&log::Record<'_>> for LogEntry {
    fn from(value: &log::Record) -> Self {
        Self {
            level: value.level().into(),
            message: value.args().to_string(),
            target: value.target().to_string(),
            module: value.module_path().unwrap_or_default().to_string(),
            file: value.file().unwrap_or_default().to_string(),
            line: value.line().unwrap_or_default(),
        }
    }
}

/// Installs the global logger.
pub fn init(verbosity: LevelFilter, log_file: Option<&Path>) -> Result<(), Error> {
    let mut logger = MultiLogger::new().with_logger(Box::new(
        env_logger::builder()
            .format_timestamp(None)
            .filter_level(verbosity)
            .build(),
    ));
    for target in QUIET_TARGETS {
        logger = logger.with_target_filter(target, verbosity.min(LevelFilter::Debug));
    }

    if let Some(path) = log_file {
        logger.add_logger(JsonFileLog::new(path).into_logger());
    }

    logger.init().context("Logger already registered")
}
