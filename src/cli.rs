use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::STGPLAN_VERSION;

#[derive(Parser, Debug)]
#[clap(version = STGPLAN_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Path of the configuration file
    #[arg(global = true, short, long)]
    pub config: Option<PathBuf>,

    /// Path to save an eventual fatal error
    #[arg(global = true, short, long)]
    pub error: Option<PathBuf>,

    /// Path of a file that receives the full log as JSON lines
    #[arg(global = true, long)]
    pub log_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe the storage of the running system
    Probe {
        /// Path to save the probed devicegraph, stdout if not given
        #[clap(short, long)]
        outfile: Option<PathBuf>,
    },

    /// Check a devicegraph for inconsistencies
    Check {
        /// Path of the devicegraph
        #[clap(index = 1)]
        graph: PathBuf,
    },

    /// Print the actions that turn one devicegraph into another
    Plan {
        /// Devicegraph of the current system
        #[clap(index = 1)]
        probed: PathBuf,

        /// Desired devicegraph
        #[clap(index = 2)]
        staging: PathBuf,

        /// Print the actions as JSON
        #[clap(long)]
        json: bool,
    },

    /// Plan and execute the actions that turn one devicegraph into another
    Commit {
        /// Devicegraph of the current system
        #[clap(index = 1)]
        probed: PathBuf,

        /// Desired devicegraph
        #[clap(index = 2)]
        staging: PathBuf,

        /// Only log the commands instead of running them
        #[clap(long)]
        dry_run: bool,
    },
}

impl std::fmt::Display for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Commands::Probe { .. } => "probe",
            Commands::Check { .. } => "check",
            Commands::Plan { .. } => "plan",
            Commands::Commit { .. } => "commit",
        };
        write!(f, "{name}")
    }
}
