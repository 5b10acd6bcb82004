use std::{
    fs::File,
    io::Write,
    path::Path,
    sync::Mutex,
};

use log::{LevelFilter, Log, Record};

use super::LogEntry;

/// Writes every record as one JSON object per line.
pub struct JsonFileLog {
    target: Option<Mutex<File>>,
    max_level: LevelFilter,
}

impl JsonFileLog {
    /// Creates the log file, truncating an existing one. If the file cannot
    /// be created the logger stays disabled.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let target = match File::create(path.as_ref()) {
            Ok(file) => Some(Mutex::new(file)),
            Err(err) => {
                eprintln!(
                    "Logging setup error: failed to create log file '{}': {err}",
                    path.as_ref().display()
                );
                None
            }
        };

        Self {
            target,
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_max_level(self, max_level: LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        if let Some(file) = self.target.as_ref() {
            let mut line = serde_json::to_string(&LogEntry::from(record))?;
            line.push('\n');

            let mut file = file.lock()?;
            file.write_all(line.as_bytes())?;
        }
        Ok(())
    }
}

impl Log for JsonFileLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.target.is_some() && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        // Losing a line of the log file is not worth failing the operation
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Some(file) = self.target.as_ref() {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}
