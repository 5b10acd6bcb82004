use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    io,
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Command as StdCommand, Output},
};

use log::trace;
use strum_macros::{EnumIter, IntoStaticStr};

use stgplan_api::error::{CommandFailedError, StorageError, StorageResultExt};

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Failed to find dependency '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },

    #[error("Failed to execute dependency '{dependency}': {inner}")]
    CouldNotExecute {
        dependency: Dependency,
        #[source]
        inner: io::Error,
    },

    #[error("Dependency '{dependency}' finished unsuccessfully: {explanation}\nCmdline: {rendered_command}\n{output}")]
    ExecutionFailed {
        dependency: Dependency,
        rendered_command: String,
        code: Option<i32>,
        signal: Option<i32>,
        explanation: String,
        output: String,
    },
}

impl From<DependencyError> for StorageError {
    #[track_caller]
    fn from(value: DependencyError) -> Self {
        match value {
            DependencyError::NotFound { dependency, .. }
            | DependencyError::CouldNotExecute { dependency, .. } => {
                StorageError::new(CommandFailedError::Spawn {
                    command: dependency.name().to_owned(),
                })
            }
            DependencyError::ExecutionFailed {
                rendered_command,
                code: Some(exit_code),
                ..
            } => StorageError::new(CommandFailedError::ExitCode {
                command: rendered_command,
                exit_code,
            }),
            DependencyError::ExecutionFailed {
                rendered_command, ..
            } => StorageError::new(CommandFailedError::Signal {
                command: rendered_command,
            }),
        }
    }
}

pub trait DependencyResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, StorageError>;
}

impl<T> DependencyResultExt<T> for Result<T, Box<DependencyError>> {
    #[track_caller]
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, StorageError> {
        let result: Result<T, StorageError> = self.map_err(|e| (*e).into());
        result.message(context)
    }
}

/// External tools used to probe and modify storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Bcache,
    Blkid,
    Btrfs,
    Cryptsetup,
    Df,
    Findmnt,
    #[strum(serialize = "jfs_tune")]
    JfsTune,
    Lsblk,
    Lvchange,
    Lvcreate,
    Lvremove,
    Lvresize,
    Lvs,
    #[strum(serialize = "make-bcache")]
    MakeBcache,
    Mdadm,
    Mkfs,
    Mkswap,
    Mount,
    Parted,
    Pvcreate,
    Pvremove,
    Pvs,
    Reiserfstune,
    Swaplabel,
    Swapoff,
    Swapon,
    Tune2fs,
    Udevadm,
    Umount,
    Vgcreate,
    Vgextend,
    Vgreduce,
    Vgremove,
    Vgs,
    Wipefs,
    #[strum(serialize = "xfs_admin")]
    XfsAdmin,
    // Test dependencies
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    False,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl Dependency {
    /// Gets the name of the dependency
    ///
    /// For example, Dependency::Mdadm => "mdadm"
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Checks if the dependency is present in the system
    pub fn exists(&self) -> bool {
        self.path().is_ok()
    }

    /// Gets the path of the dependency
    pub fn path(&self) -> Result<PathBuf, Box<DependencyError>> {
        which::which(self.name()).map_err(|source| {
            Box::new(DependencyError::NotFound {
                dependency: *self,
                source,
            })
        })
    }

    /// Converts the dependency to a new Command instance
    /// (Note this does not create a std::process::Command instance)
    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            args: vec![],
        }
    }
}

/// A command line for one of the known dependencies. Commands are built by
/// the planner and either executed directly or handed to a
/// [`CommandRunner`](crate::runner::CommandRunner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    dependency: Dependency,
    args: Vec<OsString>,
}

impl Command {
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args(args);
        self
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn run_and_check(&self) -> Result<(), Box<DependencyError>> {
        self.output()?.check()
    }

    pub fn output_and_check(&self) -> Result<String, Box<DependencyError>> {
        self.output()?.check_output()
    }

    /// Renders the command line, quoting arguments that contain spaces.
    pub fn render_command(&self) -> String {
        if self.args.is_empty() {
            self.dependency.to_string()
        } else {
            format!(
                "{} {}",
                self.dependency,
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .map(|arg| if arg.contains(' ') {
                        format!("'{arg}'")
                    } else {
                        arg.into()
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
    }

    pub fn output(&self) -> Result<CommandOutput, Box<DependencyError>> {
        let mut cmd = StdCommand::new(self.dependency.path()?);
        cmd.args(&self.args);
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");
        let output = cmd
            .output()
            .map_err(|inner| DependencyError::CouldNotExecute {
                dependency: self.dependency,
                inner,
            })?;
        let output = CommandOutput {
            rendered_command: rendered_command.clone(),
            dependency: self.dependency,
            inner: output,
        };
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            output.explain_exit(),
            output.output_report(),
        );
        Ok(output)
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    rendered_command: String,
    dependency: Dependency,
    inner: Output,
}

impl CommandOutput {
    /// Checks if the process exited successfully
    pub fn success(&self) -> bool {
        self.inner.status.success()
    }

    /// Gets the exit code of the process, if it exited normally
    pub fn code(&self) -> Option<i32> {
        self.inner.status.code()
    }

    /// Gets the signal that terminated the process, if it was terminated by a signal
    pub fn signal(&self) -> Option<i32> {
        self.inner.status.signal()
    }

    /// Gets stderr
    pub fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stderr).into()
    }

    /// Gets stdout
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stdout).into()
    }

    /// Gets all available output, useful for reporting or debugging
    pub fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut res = String::with_capacity(stdout.len() + stderr.len() + 20);

        if !stdout.is_empty() {
            res += &format!("stdout:\n{stdout}\n");
        }

        if !stderr.is_empty() {
            if !res.is_empty() {
                res += "\n";
            }
            res += &format!("stderr:\n{stderr}\n");
        }

        res
    }

    /// Checks if the process exited successfully, otherwise produces an error
    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.success() {
            return Ok(());
        }

        Err(Box::new(DependencyError::ExecutionFailed {
            dependency: self.dependency,
            rendered_command: self.rendered_command.clone(),
            code: self.code(),
            signal: self.signal(),
            explanation: self.explain_exit(),
            output: match self.output_report() {
                s if !s.is_empty() => s,
                _ => "(no output collected)".into(),
            },
        }))
    }

    /// Checks if the process exited successfully and returns the output,
    /// otherwise produces an error with the output
    pub fn check_output(&self) -> Result<String, Box<DependencyError>> {
        self.check()?;
        Ok(self.output())
    }

    /// Produces a string explaining the exit status of the process
    pub fn explain_exit(&self) -> String {
        if let Some(code) = self.code() {
            format!("exited with status: {code}")
        } else if let Some(signal) = self.signal() {
            format!("terminated by signal: {signal}")
        } else {
            "exited with unknown status".into()
        }
    }
}
