use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Size and usage of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfSpace {
    pub size: u64,
    pub used: u64,
}

pub fn space(path: impl AsRef<Path>) -> Result<DfSpace, Error> {
    let output = Dependency::Df
        .cmd()
        .with_arg(path.as_ref())
        .with_args(["-B", "1", "--output=size,used"]) // Report sizes in bytes
        .output_and_check()
        .context("Failed to execute df")?;

    parse_df_output(&output)
}

fn parse_df_output(output: &str) -> Result<DfSpace, Error> {
    let line = output
        .lines()
        .nth(1) // Skip the header line
        .context("Failed to access space output from df")?;

    let mut fields = line.split_whitespace();
    let mut next_number = |what: &str| -> Result<u64, Error> {
        fields
            .next()
            .with_context(|| format!("Missing {what} in df output"))?
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {what}"))
    };

    Ok(DfSpace {
        size: next_number("size")?,
        used: next_number("used")?,
    })
}
