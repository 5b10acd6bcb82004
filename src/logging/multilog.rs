use std::collections::BTreeMap;

use log::{LevelFilter, Log, Metadata, Record};

/// Fans records out to several loggers. Targets can be capped to a lower
/// level than the loggers accept.
pub struct MultiLogger {
    loggers: Vec<Box<dyn Log>>,
    target_filters: BTreeMap<String, LevelFilter>,
    max_level: LevelFilter,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
            target_filters: BTreeMap::new(),
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    /// Caps records of `target` and its submodules at `level`.
    pub fn with_target_filter(mut self, target: &str, level: LevelFilter) -> Self {
        self.target_filters.insert(target.to_owned(), level);
        self
    }

    pub fn add_logger(&mut self, logger: Box<dyn Log>) {
        self.loggers.push(logger);
    }

    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.max_level);
        log::set_boxed_logger(Box::new(self))
    }

    /// Level cap of the most specific filter matching `target`.
    fn target_level(&self, target: &str) -> LevelFilter {
        self.target_filters
            .iter()
            .filter(|(prefix, _)| {
                target == prefix.as_str()
                    || target
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with("::"))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(LevelFilter::Trace, |(_, level)| *level)
    }

    fn passes(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level && metadata.level() <= self.target_level(metadata.target())
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.passes(metadata) && self.loggers.iter().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if !self.passes(record.metadata()) {
            return;
        }
        self.loggers
            .iter()
            .filter(|l| l.enabled(record.metadata()))
            .for_each(|l| l.log(record));
    }

    fn flush(&self) {
        self.loggers.iter().for_each(|l| l.flush());
    }
}
