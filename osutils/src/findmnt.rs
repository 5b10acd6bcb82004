//! Mount table entries from `findmnt`, and active swap areas from
//! `/proc/swaps`.

use std::fs;

use anyhow::{Context, Error};
use serde::Deserialize;

use crate::dependencies::Dependency;

pub const PROC_SWAPS_PATH: &str = "/proc/swaps";

/// Columns requested from findmnt, matching the fields of [`MountEntry`].
pub const FINDMNT_COLUMNS: &str = "TARGET,SOURCE,FSTYPE,OPTIONS";

#[derive(Debug, Deserialize)]
struct FindMnt {
    filesystems: Vec<MountEntry>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mount point.
    pub target: String,

    /// Mounted device or `server:/path` for NFS. Some pseudo filesystems
    /// report no source.
    pub source: Option<String>,

    /// Kernel filesystem type.
    pub fstype: String,

    #[serde(deserialize_with = "comma_separated")]
    pub options: Vec<String>,
}

fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(value
        .split(',')
        .filter(|option| !option.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Runs findmnt on the whole mount table.
pub fn mounts() -> Result<Vec<MountEntry>, Error> {
    let output = Dependency::Findmnt
        .cmd()
        .with_args(["--json", "--list", "--output", FINDMNT_COLUMNS])
        .output_and_check()
        .context("Failed to execute findmnt")?;
    parse(&output)
}

pub fn parse(output: &str) -> Result<Vec<MountEntry>, Error> {
    let parsed: FindMnt =
        serde_json::from_str(output).context("Failed to parse findmnt output")?;
    Ok(parsed.filesystems)
}

/// Device paths of active swap areas.
pub fn swaps() -> Result<Vec<String>, Error> {
    let content = fs::read_to_string(PROC_SWAPS_PATH)
        .with_context(|| format!("Failed to read {PROC_SWAPS_PATH}"))?;
    Ok(parse_swaps(&content))
}

pub fn parse_swaps(content: &str) -> Vec<String> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    #[test]
    fn test_parse() {
        let output = indoc! {r#"
            {
               "filesystems": [
                  {"target":"/", "source":"/dev/sda2", "fstype":"ext4", "options":"rw,relatime"},
                  {"target":"/proc", "source":"proc", "fstype":"proc", "options":"rw,nosuid,nodev,noexec,relatime"},
                  {"target":"/mnt/nfs", "source":"server:/export//data/", "fstype":"nfs4", "options":"rw,vers=4.2"},
                  {"target":"/run/overlay", "source":null, "fstype":"overlay", "options":null}
               ]
            }
        "#};

        let mounts = parse(output).unwrap();
        assert_eq!(mounts.len(), 4);
        assert_eq!(
            mounts[0],
            MountEntry {
                target: "/".into(),
                source: Some("/dev/sda2".into()),
                fstype: "ext4".into(),
                options: vec!["rw".into(), "relatime".into()],
            }
        );
        assert_eq!(mounts[2].fstype, "nfs4");
        assert_eq!(mounts[3].source, None);
        assert!(mounts[3].options.is_empty());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse(r#"{"mounts": []}"#).is_err());
    }

    #[test]
    fn test_parse_swaps() {
        let content = indoc! {"
            Filename				Type		Size		Used		Priority
            /dev/sda3                               partition	2097148		0		-2
            /dev/dm-1                               partition	1048572		0		-3
        "};
        assert_eq!(parse_swaps(content), vec!["/dev/sda3", "/dev/dm-1"]);
        assert!(parse_swaps("Filename Type Size Used Priority\n").is_empty());
    }
}
