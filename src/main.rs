use std::{path::Path, process::ExitCode};

use clap::Parser;
use log::{error, info};

use stgplan::{
    cli::{Cli, Commands},
    config::PlannerConfig,
    load_graph, logging, write_output, Stgplan, STGPLAN_VERSION,
};
use stgplan_api::error::{InternalError, ReportError, StorageError, StorageResultExt};

fn run(args: &Cli) -> Result<(), StorageError> {
    // Log version ASAP
    info!("stgplan version: {STGPLAN_VERSION}");

    let config =
        PlannerConfig::load(args.config.as_deref()).message("Failed to load configuration")?;
    let stgplan = Stgplan::new(config);

    match &args.command {
        Commands::Probe { outfile } => {
            let graph = stgplan.probe()?;
            write_output(outfile.as_deref(), &graph.save()?)
        }

        Commands::Check { graph } => {
            let graph = load_graph(graph)?;
            let issues = stgplan.check(&graph)?;
            let report = issues
                .iter()
                .map(|issue| format!("{issue}\n"))
                .collect::<String>();
            write_output(None, &report)
        }

        Commands::Plan {
            probed,
            staging,
            json,
        } => {
            let texts = stgplan.plan(&load_graph(probed)?, &load_graph(staging)?)?;
            let output = if *json {
                let mut output = serde_json::to_string_pretty(&texts)
                    .structured(InternalError::Internal("Failed to serialize actions"))?;
                output.push('\n');
                output
            } else {
                texts.iter().map(|text| format!("{text}\n")).collect()
            };
            write_output(None, &output)
        }

        Commands::Commit {
            probed,
            staging,
            dry_run,
        } => stgplan.commit(&load_graph(probed)?, &load_graph(staging)?, *dry_run),
    }
}

/// Best effort attempt to save the error for the caller.
fn write_error(path: &Path, e: &StorageError) {
    let serialized = match serde_yaml::to_string(e) {
        Ok(serialized) => serialized,
        Err(e2) => {
            error!("Failed to serialize error: {e2}");
            return;
        }
    };
    if let Err(e2) = std::fs::write(path, serialized) {
        error!("Failed to write error to file: {e2}");
    }
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    if let Err(e) = logging::init(args.verbosity, args.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    match run(&args).message(format!("Failed to execute '{}' command", args.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("stgplan failed: {e:?}");
            if let Some(path) = &args.error {
                write_error(path, &e);
            }
            if e.is_defect() {
                ExitCode::from(3)
            } else {
                ExitCode::from(2)
            }
        }
    }
}
