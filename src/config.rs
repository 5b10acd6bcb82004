use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use stgplan_api::{
    constants::{ETC_CRYPTTAB_PATH, ETC_FSTAB_PATH, ETC_MDADM_PATH},
    error::{InvalidInputError, ReportError, StorageError},
};
use sysdefs::arch::SystemArchitecture;

/// Location of the configuration file when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/stgplan/config.yaml";

/// Definition of the planner's configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlannerConfig {
    /// Path of the mdadm configuration file.
    #[serde(default = "default_etc_mdadm_path")]
    pub etc_mdadm_path: PathBuf,

    #[serde(default = "default_etc_fstab_path")]
    pub etc_fstab_path: PathBuf,

    #[serde(default = "default_etc_crypttab_path")]
    pub etc_crypttab_path: PathBuf,

    /// Page size in bytes. Defaults to the page size of the architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,

    /// Directory mount points are mounted below during commit. For instance,
    /// with "/mnt" the mount point "/home" gets mounted on "/mnt/home".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_prefix: Option<PathBuf>,

    /// Only log the commands a commit would run.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_etc_mdadm_path() -> PathBuf {
    ETC_MDADM_PATH.into()
}

fn default_etc_fstab_path() -> PathBuf {
    ETC_FSTAB_PATH.into()
}

fn default_etc_crypttab_path() -> PathBuf {
    ETC_CRYPTTAB_PATH.into()
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            etc_mdadm_path: default_etc_mdadm_path(),
            etc_fstab_path: default_etc_fstab_path(),
            etc_crypttab_path: default_etc_crypttab_path(),
            page_size: None,
            root_prefix: None,
            dry_run: false,
        }
    }
}

impl PlannerConfig {
    /// Loads the configuration from `path`, or from [`DEFAULT_CONFIG_PATH`]
    /// if no path is given. A missing default file means all defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, StorageError> {
        let path = match path {
            Some(path) => path,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    debug!("No configuration at {DEFAULT_CONFIG_PATH}, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let contents = fs::read_to_string(path).structured(InvalidInputError::LoadConfig {
            path: path.to_string_lossy().to_string(),
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, StorageError> {
        // An empty document is a valid configuration without any settings
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).structured(InvalidInputError::ParseConfig)
    }

    /// The configured page size, or the one of the running architecture.
    pub fn page_size(&self) -> u64 {
        self.page_size
            .unwrap_or_else(|| SystemArchitecture::current().page_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;

    use stgplan_api::error::ErrorKind;

    #[test]
    fn test_parse() {
        let config = PlannerConfig::parse(indoc! {"
            etc-fstab-path: /mnt/etc/fstab
            page-size: 65536
            dry-run: true
        "})
        .unwrap();
        assert_eq!(config.etc_fstab_path, Path::new("/mnt/etc/fstab"));
        assert_eq!(config.etc_mdadm_path, Path::new(ETC_MDADM_PATH));
        assert_eq!(config.page_size(), 65536);
        assert!(config.dry_run);
        assert_eq!(config.root_prefix, None);

        assert_eq!(PlannerConfig::parse("").unwrap(), PlannerConfig::default());
        assert_eq!(
            PlannerConfig::default().page_size(),
            SystemArchitecture::current().page_size()
        );
    }

    #[test]
    fn test_parse_unknown_field() {
        let error = PlannerConfig::parse("etc-fstab: /etc/fstab\n").unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::InvalidInput(InvalidInputError::ParseConfig)
        );
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "root-prefix: /mnt\n").unwrap();
        let config = PlannerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.root_prefix, Some(PathBuf::from("/mnt")));

        let missing = dir.path().join("missing.yaml");
        let error = PlannerConfig::load(Some(&missing)).unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::InvalidInput(InvalidInputError::LoadConfig {
                path: missing.to_string_lossy().to_string()
            })
        );
    }
}
