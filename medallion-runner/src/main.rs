//! Medallion runner binary.
//!
//! Loads the runner configuration, initializes tracing and runs the Bronze and Silver layers of
//! one source for one run timestamp.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use medallion::store::DEFAULT_VACUUM_RETENTION_HOURS;
use medallion_config::shared::RunnerConfig;
use medallion_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_runner_config;
use crate::core::{
    LayerSelection, RunRequest, run_maintenance, run_with_config, source_runplan, summarize_dag,
};
use crate::error::{RunnerError, RunnerResult};

mod config;
mod core;
mod error;

#[derive(Parser, Debug)]
#[command(name = "medallion-runner", about = "Runs the Bronze and Silver layers of a source")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the exports of one run into Bronze and merge them into Silver
    Run {
        /// Run timestamp, `YYYYMMDDTHHMMSSfff`
        #[arg(long)]
        run_ts: String,

        /// Run identifier, defaults to `{source}_{run_ts}`
        #[arg(long)]
        run_id: Option<String>,

        #[arg(long, value_enum, default_value_t = LayerSelection::All)]
        layer: LayerSelection,

        /// Only process these tables, repeatable
        #[arg(long = "retry-table")]
        retry_tables: Vec<String>,

        /// Also retry the tables recorded as failed for this run timestamp
        #[arg(long)]
        retry_failed: bool,

        /// Fixed number of concurrent tables instead of the history-based choice
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Print the table counts of the configured DAG
    Summarize,
    /// Print the run plan entries of the configured source
    Schedule,
    /// Compact Silver tables and remove data files older than the retention
    Maintain {
        #[arg(long, default_value_t = DEFAULT_VACUUM_RETENTION_HOURS)]
        retention_hours: i64,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    match try_main(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn try_main(args: Args) -> RunnerResult<()> {
    let runner_config = load_runner_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(RunnerError::config)?;

    match args.command {
        Command::Summarize => {
            println!("{}", summarize_dag(&runner_config)?);
            Ok(())
        }
        Command::Schedule => {
            println!("{}", source_runplan(&runner_config)?);
            Ok(())
        }
        Command::Maintain { retention_hours } => {
            let outcomes = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(run_maintenance(&runner_config, retention_hours))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcomes).map_err(RunnerError::config)?
            );
            Ok(())
        }
        Command::Run {
            run_ts,
            run_id,
            layer,
            retry_tables,
            retry_failed,
            workers,
        } => {
            let request = RunRequest {
                run_ts,
                run_id,
                layer,
                retry_tables,
                retry_failed,
                workers,
            };

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(async_main(runner_config, request))
        }
    }
}

async fn async_main(runner_config: RunnerConfig, request: RunRequest) -> RunnerResult<()> {
    if let Err(err) = run_with_config(runner_config, request).await {
        error!(category = err.category(), "{err}");
        return Err(err);
    }

    Ok(())
}
