mod commands;
mod output;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use scanflow_rpc::{RpcError, RpcServer};
use scanflow_service::config::CONFIG_FILE;
use scanflow_service::{init_logging, progress_channel, ConfigError, EngineConfig, ExecutionEvent};

use commands::pipeline::ListPipelinesArgs;
use commands::project::{AddInputArgs, CreateProjectArgs, DeleteProjectArgs};
use commands::report::OutputArgs;
use commands::run::{ExecuteArgs, ListRunsArgs, ResumeRunArgs, RunRefArgs, StatusArgs};

/// Exit code for usage and configuration errors
const USAGE_ERROR: i32 = 4;

/// Run software composition analysis pipelines on local projects
#[derive(Parser, Debug)]
#[command(name = "scanflow", version, about)]
struct Cli {
    /// Configuration file (default: <work root>/scanflow.yml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Work root holding projects and state (overrides the configuration)
    #[arg(long, global = true, value_name = "DIR")]
    work_root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a project, optionally with inputs and pipelines
    CreateProject(CreateProjectArgs),

    /// Add input files or URLs to a project
    AddInput(AddInputArgs),

    /// List the available pipelines
    ListPipelines(ListPipelinesArgs),

    /// Add pipelines to a project and execute its pending runs
    Execute(ExecuteArgs),

    /// List the runs of a project
    ListRuns(ListRunsArgs),

    /// Show the status of a run
    Status(StatusArgs),

    /// Stop a run
    StopRun(RunRefArgs),

    /// Continue a failed or stopped run in a new run
    ResumeRun(ResumeRunArgs),

    /// Write a report of a project
    Output(OutputArgs),

    /// Delete a project and its work directory
    DeleteProject(DeleteProjectArgs),
}

fn load_config(cli: &Cli) -> std::result::Result<EngineConfig, ConfigError> {
    let explicit = cli.config.clone().or_else(|| {
        cli.work_root
            .as_ref()
            .map(|root| root.join(CONFIG_FILE))
            .filter(|path| path.exists())
    });
    let mut config = EngineConfig::load(explicit.as_deref())?;
    if let Some(root) = &cli.work_root {
        config.work_root = root.clone();
    }
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "info".to_string(),
        2 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    Ok(config)
}

async fn dispatch(cli: Cli, config: EngineConfig) -> Result<i32> {
    let state_file = config.state_file();
    let (tx, mut rx) = progress_channel();
    let server = RpcServer::open_with_progress(config, tx)?;

    // Print progress and keep the state file current so other invocations see it
    let store = server.store().clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            output::event(&event);
            if matches!(
                event,
                ExecutionEvent::RunStarted { .. } | ExecutionEvent::StepCompleted { .. }
            ) {
                if let Err(e) = store.save(&state_file) {
                    tracing::warn!(error = %e, "failed to save state");
                }
            }
        }
    });

    let result = match cli.command {
        Command::CreateProject(args) => commands::project::create(&server, args).await,
        Command::AddInput(args) => commands::project::add_input(&server, args),
        Command::ListPipelines(args) => commands::pipeline::list(&server, args),
        Command::Execute(args) => commands::run::execute(&server, args).await,
        Command::ListRuns(args) => commands::run::list(&server, args),
        Command::Status(args) => commands::run::status(&server, args),
        Command::StopRun(args) => commands::run::stop(&server, args),
        Command::ResumeRun(args) => commands::run::resume(&server, args).await,
        Command::Output(args) => commands::report::output(&server, args),
        Command::DeleteProject(args) => commands::project::delete(&server, args),
    };

    drop(server);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "progress printer failed");
    }
    result
}

/// Usage errors exit with 4, everything else with 1
fn exit_code(report: &color_eyre::Report) -> i32 {
    let usage = report
        .downcast_ref::<RpcError>()
        .is_some_and(RpcError::is_usage_error);
    if usage {
        USAGE_ERROR
    } else {
        1
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            output::error(&e.to_string());
            process::exit(USAGE_ERROR);
        }
    };
    init_logging(&config.logging);

    match dispatch(cli, config).await {
        Ok(0) => Ok(()),
        Ok(code) => process::exit(code),
        Err(report) => {
            output::error(&format!("{:#}", report));
            process::exit(exit_code(&report));
        }
    }
}
