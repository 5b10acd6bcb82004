//! Storage configuration planner.
//!
//! `stgplan` probes the storage of a system into a [`Devicegraph`], compares
//! it with a desired devicegraph and commits the ordered actions that turn
//! one into the other.

use std::{fs, path::Path};

use log::{debug, info};

use osutils::runner::{CommandRunner, DryRunCommandRunner, SystemCommandRunner};
use stgplan_api::{
    devicegraph::check::CheckCallbacks,
    error::{InternalError, InvalidInputError, ReportError, StorageError, StorageResultExt},
    Devicegraph,
};

pub mod actiongraph;
pub mod cli;
pub mod commit;
pub mod config;
pub mod devices;
pub mod logging;
pub mod prober;
pub mod system_info;

use actiongraph::{ActionText, Actiongraph, Tense};
use commit::{CommitData, CommitOptions, LoggingCommitCallbacks};
use config::PlannerConfig;
use prober::LoggingProbeCallbacks;
use system_info::{CachedSystemInfo, LiveSystemInfo};

/// Version of the planner, taken from the package.
pub const STGPLAN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Collects the issues found by [`Devicegraph::check`].
#[derive(Debug, Default)]
pub struct CheckIssues {
    pub issues: Vec<String>,
}

impl CheckCallbacks for CheckIssues {
    fn error(&mut self, message: &str) {
        self.issues.push(message.to_owned());
    }
}

/// Loads a devicegraph saved by [`Devicegraph::save`].
pub fn load_graph(path: &Path) -> Result<Devicegraph, StorageError> {
    let text = fs::read_to_string(path).structured(InvalidInputError::LoadGraph {
        path: path.to_string_lossy().to_string(),
    })?;
    Devicegraph::load(&text).message(format!(
        "Failed to load devicegraph from '{}'",
        path.display()
    ))
}

/// Writes `contents` to `path`, or to stdout if there is no path.
pub fn write_output(path: Option<&Path>, contents: &str) -> Result<(), StorageError> {
    match path {
        Some(path) => fs::write(path, contents).structured(InternalError::WriteFile {
            path: path.to_string_lossy().to_string(),
        }),
        None => {
            print!("{contents}");
            Ok(())
        }
    }
}

pub struct Stgplan {
    config: PlannerConfig,
}

impl Stgplan {
    pub fn new(config: PlannerConfig) -> Self {
        Stgplan { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Probes the running system.
    pub fn probe(&self) -> Result<Devicegraph, StorageError> {
        let system_info = CachedSystemInfo::new(LiveSystemInfo::new(&self.config));
        prober::probe(&system_info, &mut LoggingProbeCallbacks)
    }

    /// Checks `graph` and returns the issues found.
    pub fn check(&self, graph: &Devicegraph) -> Result<Vec<String>, StorageError> {
        let mut issues = CheckIssues::default();
        graph.check(Some(&mut issues), self.config.page_size())?;
        debug!("Found {} issues", issues.issues.len());
        Ok(issues.issues)
    }

    /// Texts of the actions turning `probed` into `staging`, in commit order.
    pub fn plan(
        &self,
        probed: &Devicegraph,
        staging: &Devicegraph,
    ) -> Result<Vec<ActionText>, StorageError> {
        Actiongraph::new(probed, staging)?.texts(Tense::Pending)
    }

    /// Turns `probed` into `staging` on the running system. With `dry_run`
    /// the commands are only logged and no config file is written.
    pub fn commit(
        &self,
        probed: &Devicegraph,
        staging: &Devicegraph,
        dry_run: bool,
    ) -> Result<(), StorageError> {
        let actiongraph = Actiongraph::new(probed, staging)?;
        if actiongraph.is_empty() {
            info!("Nothing to commit");
            return Ok(());
        }

        let dry_run = dry_run || self.config.dry_run;
        let runner: &dyn CommandRunner = if dry_run {
            &DryRunCommandRunner
        } else {
            &SystemCommandRunner
        };
        let mut data = CommitData::load(&self.config)?;
        let options = CommitOptions {
            root_prefix: self.config.root_prefix.clone(),
            write_config_files: !dry_run,
        };
        info!("Committing {} actions", actiongraph.len());
        commit::commit(
            &actiongraph,
            runner,
            &mut data,
            &options,
            &mut LoggingCommitCallbacks,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stgplan_api::{
        devicegraph::device::{BlkFilesystem, Disk, MountPoint},
        devicegraph::Holder,
        error::ErrorKind,
        primitives::{bytes::ByteCount, region::Region},
    };
    use sysdefs::filesystems::RealFilesystemType;

    fn disk_graph() -> Devicegraph {
        let mut graph = Devicegraph::new();
        let disk = graph
            .create_device(Disk {
                name: "/dev/vdb".into(),
                region: Region::new(0, 8 * ByteCount::GIB / 512, 512),
                ..Default::default()
            })
            .unwrap();
        graph.find_by_sid_mut(disk).unwrap().exists_in_system = true;
        graph
    }

    #[test]
    fn test_load_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probed.yaml");
        let graph = disk_graph();
        write_output(Some(&path), &graph.save().unwrap()).unwrap();
        assert!(load_graph(&path).unwrap().equal(&graph));

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            load_graph(&missing).unwrap_err().kind(),
            ErrorKind::InvalidInput(InvalidInputError::LoadGraph { .. })
        ));
    }

    #[test]
    fn test_plan() {
        let probed = disk_graph();
        let mut staging = probed.clone();
        let disk = staging.find_by_name("/dev/vdb").unwrap().sid();
        let fs = staging
            .create_device(BlkFilesystem::new(RealFilesystemType::Ext4))
            .unwrap();
        staging.add_holder(disk, fs, Holder::filesystem_user()).unwrap();
        let mount_point = staging.create_device(MountPoint::new("/data")).unwrap();
        staging.add_holder(fs, mount_point, Holder::MountUser).unwrap();

        let stgplan = Stgplan::new(PlannerConfig::default());
        assert!(stgplan.check(&staging).unwrap().is_empty());

        let texts = stgplan.plan(&probed, &staging).unwrap();
        let verbs: Vec<&str> = texts.iter().map(|text| text.verb).collect();
        assert_eq!(verbs, vec!["create", "mount", "add-to-etc-fstab"]);

        assert!(stgplan.plan(&probed, &probed).unwrap().is_empty());
        stgplan.commit(&probed, &probed, true).unwrap();
    }
}
