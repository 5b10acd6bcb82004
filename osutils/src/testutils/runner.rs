use std::cell::RefCell;

use stgplan_api::error::{CommandFailedError, StorageError};

use crate::{
    dependencies::Command,
    runner::{CommandRunner, RunMode},
};

/// A [`CommandRunner`] that records command lines instead of executing them.
///
/// Commands whose rendered form starts with a registered prefix fail with the
/// registered exit code.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: RefCell<Vec<String>>,
    failures: Vec<(String, i32)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command starting with `prefix` exit with `exit_code`.
    pub fn fail_on(mut self, prefix: impl Into<String>, exit_code: i32) -> Self {
        self.failures.push((prefix.into(), exit_code));
        self
    }

    /// The rendered command lines, in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &Command, mode: RunMode) -> Result<i32, StorageError> {
        let rendered = command.render_command();
        self.commands.borrow_mut().push(rendered.clone());

        let exit_code = self
            .failures
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        match (exit_code, mode) {
            (0, _) | (_, RunMode::BestEffort) => Ok(exit_code),
            (exit_code, RunMode::MustSucceed) => Err(StorageError::new(
                CommandFailedError::ExitCode {
                    command: rendered,
                    exit_code,
                },
            )),
        }
    }
}
