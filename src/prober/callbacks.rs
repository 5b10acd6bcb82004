use log::{error, info, warn};

/// Receives progress and problems of a probe. Returning `false` from
/// [`ProbeCallbacks::error`] or [`ProbeCallbacks::missing_command`] aborts
/// the remaining passes.
pub trait ProbeCallbacks {
    fn begin(&mut self);

    fn end(&mut self);

    /// A single device could not be probed, or a system fact could not be
    /// read. Returns whether probing should continue.
    fn error(&mut self, message: &str, what: &str) -> bool;

    /// A tool needed to probe some device kinds is not installed.
    /// `used_features` holds the device kinds that cannot be probed.
    fn missing_command(
        &mut self,
        message: &str,
        what: &str,
        command: &str,
        used_features: u64,
    ) -> bool;
}

/// Logs everything and never aborts.
#[derive(Debug, Default)]
pub struct LoggingProbeCallbacks;

impl ProbeCallbacks for LoggingProbeCallbacks {
    fn begin(&mut self) {
        info!("Probing storage");
    }

    fn end(&mut self) {
        info!("Finished probing storage");
    }

    fn error(&mut self, message: &str, what: &str) -> bool {
        error!("{message}: {what}");
        true
    }

    fn missing_command(
        &mut self,
        message: &str,
        what: &str,
        command: &str,
        _used_features: u64,
    ) -> bool {
        warn!("{message}: command '{command}' not found ({what})");
        true
    }
}

/// Records callback invocations as strings.
#[derive(Debug, Default)]
pub struct ProbeCallbacksRecorder {
    pub messages: Vec<String>,

    /// Value returned from `error` and `missing_command`.
    pub abort: bool,
}

impl ProbeCallbacks for ProbeCallbacksRecorder {
    fn begin(&mut self) {
        self.messages.push("begin:".to_owned());
    }

    fn end(&mut self) {
        self.messages.push("end:".to_owned());
    }

    fn error(&mut self, message: &str, what: &str) -> bool {
        self.messages
            .push(format!("error: message = '{message}', what = '{what}'"));
        !self.abort
    }

    fn missing_command(
        &mut self,
        message: &str,
        what: &str,
        command: &str,
        used_features: u64,
    ) -> bool {
        self.messages.push(format!(
            "missing-command: message = '{message}', what = '{what}', command = '{command}', used_features = {used_features}"
        ));
        !self.abort
    }
}
