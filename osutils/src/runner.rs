//! Execution of commit-time commands.
//!
//! Planned actions do not execute tools themselves. They build a
//! [`Command`] and hand it to a [`CommandRunner`], which decides whether and
//! how the command really runs.

use log::{info, warn};

use stgplan_api::error::{CommandFailedError, ReportError, StorageError};

use crate::dependencies::{Command, DependencyError};

/// Exit code reported for commands that could not be started in
/// [`RunMode::BestEffort`].
pub const EXIT_CODE_NOT_EXECUTED: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// A non-zero exit is an error.
    MustSucceed,

    /// Failures are logged and the exit code is returned.
    BestEffort,
}

pub trait CommandRunner {
    /// Runs `command` and returns its exit code.
    fn run(&self, command: &Command, mode: RunMode) -> Result<i32, StorageError>;
}

/// Runs commands on the local system.
#[derive(Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, command: &Command, mode: RunMode) -> Result<i32, StorageError> {
        let rendered = command.render_command();
        let output = match command.output() {
            Ok(output) => output,
            Err(e) if mode == RunMode::BestEffort => {
                warn!("Ignoring failure of '{rendered}': {e}");
                return Ok(EXIT_CODE_NOT_EXECUTED);
            }
            Err(e) => return Err(StorageError::from(*e)),
        };

        match (output.check(), mode) {
            (Ok(()), _) => Ok(0),
            (Err(e), RunMode::BestEffort) => {
                warn!("Ignoring failure of '{rendered}': {e}");
                Ok(output.code().unwrap_or(EXIT_CODE_NOT_EXECUTED))
            }
            (Err(e), RunMode::MustSucceed) => {
                let kind = match output.code() {
                    Some(exit_code) => CommandFailedError::ExitCode {
                        command: rendered,
                        exit_code,
                    },
                    None => CommandFailedError::Signal { command: rendered },
                };
                Err::<i32, Box<DependencyError>>(e).structured(kind)
            }
        }
    }
}

/// Logs commands instead of running them.
#[derive(Debug, Default)]
pub struct DryRunCommandRunner;

impl CommandRunner for DryRunCommandRunner {
    fn run(&self, command: &Command, _mode: RunMode) -> Result<i32, StorageError> {
        info!("Would execute '{}'", command.render_command());
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stgplan_api::error::ErrorKind;

    use crate::dependencies::Dependency;

    #[test]
    fn test_system_runner() {
        let runner = SystemCommandRunner;
        assert_eq!(
            runner
                .run(&Dependency::Echo.cmd().with_arg("hi"), RunMode::MustSucceed)
                .unwrap(),
            0
        );

        assert_eq!(
            runner
                .run(&Dependency::False.cmd(), RunMode::BestEffort)
                .unwrap(),
            1
        );

        let error = runner
            .run(&Dependency::False.cmd(), RunMode::MustSucceed)
            .unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::CommandFailed(CommandFailedError::ExitCode {
                command: "false".into(),
                exit_code: 1
            })
        );
    }

    #[test]
    fn test_system_runner_missing_binary() {
        let runner = SystemCommandRunner;
        assert_eq!(
            runner
                .run(&Dependency::DoesNotExist.cmd(), RunMode::BestEffort)
                .unwrap(),
            EXIT_CODE_NOT_EXECUTED
        );
        let error = runner
            .run(&Dependency::DoesNotExist.cmd(), RunMode::MustSucceed)
            .unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::CommandFailed(CommandFailedError::Spawn { .. })
        ));
    }

    #[test]
    fn test_dry_run_runner() {
        let runner = DryRunCommandRunner;
        assert_eq!(
            runner
                .run(&Dependency::False.cmd(), RunMode::MustSucceed)
                .unwrap(),
            0
        );
    }
}
