use anyhow::{Context, Error};

use crate::dependencies::{Command, Dependency};

/// Command waiting for the udev event queue to drain, so that device nodes
/// of newly created devices exist.
pub fn settle_command() -> Command {
    Dependency::Udevadm.cmd().with_arg("settle")
}

pub fn settle() -> Result<(), Error> {
    settle_command()
        .run_and_check()
        .context("Failed settle udev setup")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_command() {
        assert_eq!(settle_command().render_command(), "udevadm settle");
    }
}
