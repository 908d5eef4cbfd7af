use crate::output;

use std::fs;

use clap::Args;
use color_eyre::Result;

use scanflow_rpc::queue::execute_with_timeout;
use scanflow_rpc::{RpcError, RpcServer};
use scanflow_service::models::{Run, RunId, RunOptions, RunStatus};
use scanflow_service::utils::humanize_time;

/// Add pipelines to a project and execute its pending runs
#[derive(Args, Debug)]
pub struct ExecuteArgs {
    /// Project name or id
    pub project: String,

    /// Pipeline to add before executing, with optional groups (`name:group1,group2`)
    #[arg(long = "pipeline", short = 'p', value_name = "NAME")]
    pub pipelines: Vec<String>,

    /// Keep running after a step fails, unless the step stops on failure
    #[arg(long)]
    pub continue_on_failure: bool,
}

/// List the runs of a project
#[derive(Args, Debug)]
pub struct ListRunsArgs {
    /// Project name or id
    pub project: String,
}

/// A single run
#[derive(Args, Debug)]
pub struct RunRefArgs {
    /// Run id
    pub run: String,
}

/// Show a run
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Run id
    pub run: String,

    /// Print the run log
    #[arg(long)]
    pub log: bool,
}

/// Resume a run
#[derive(Args, Debug)]
pub struct ResumeRunArgs {
    /// Id of the failed or stopped run
    pub run: String,

    /// Execute the new run right away
    #[arg(long)]
    pub execute: bool,
}

/// Create one run per pipeline, in order
pub fn add_pipelines(server: &RpcServer, project: &str, pipelines: &[String], options: &RunOptions) -> Result<Vec<Run>> {
    let mut runs = Vec::new();
    for pipeline in pipelines {
        let run = server
            .run_handler()
            .create_run(project, pipeline, options.clone())?;
        output::info(&format!("Pipeline {} added (run {})", run.pipeline_name, run.id));
        runs.push(run);
    }
    Ok(runs)
}

/// Execute the not-started runs of a project in creation order
///
/// Stops at the first run that does not succeed and returns its exit code.
pub async fn execute_pending(server: &RpcServer, project: &str) -> Result<i32> {
    let pending: Vec<Run> = server
        .run_handler()
        .list_runs(project)?
        .into_iter()
        .filter(|r| r.status == RunStatus::NotStarted)
        .collect();
    if pending.is_empty() {
        return Err(RpcError::InvalidRequest(format!("No pipelines to execute on project {}", project)).into());
    }

    let mut code = 0;
    for run in pending {
        let run = execute_one(server, run.id).await?;
        code = run.status.exit_code();
        if run.status != RunStatus::Succeeded {
            break;
        }
    }
    Ok(code)
}

/// Execute one run; Ctrl-C requests a stop at the next step boundary
async fn execute_one(server: &RpcServer, run_id: RunId) -> Result<Run> {
    let controller = server.controller();
    let execution = execute_with_timeout(controller, run_id, server.config().timeout());
    tokio::pin!(execution);

    tokio::select! {
        _ = &mut execution => {}
        _ = tokio::signal::ctrl_c() => {
            output::warning("Interrupted, stopping at the next step boundary");
            controller.stop(run_id)?;
            execution.await;
        }
    }

    let marker = server.config().stop_dir().join(format!("{}.stop", run_id));
    if marker.exists() {
        fs::remove_file(&marker)?;
    }
    server.save()?;

    let run = server.store().run(run_id)?;
    for step in run.failed_steps() {
        output::dim_failure(&format!(
            "  {} failed: {}",
            step.name,
            step.error.as_deref().unwrap_or("unknown error")
        ));
    }
    if run.succeeded_with_issues() {
        output::warning("Run succeeded with failed steps");
    }
    Ok(run)
}

pub async fn execute(server: &RpcServer, args: ExecuteArgs) -> Result<i32> {
    let options = RunOptions {
        continue_on_failure: args.continue_on_failure,
        ..Default::default()
    };
    add_pipelines(server, &args.project, &args.pipelines, &options)?;
    server.save()?;
    execute_pending(server, &args.project).await
}

pub fn list(server: &RpcServer, args: ListRunsArgs) -> Result<i32> {
    let runs = server.run_handler().list_runs(&args.project)?;
    output::status("Runs", &format!("{} for project {}", runs.len(), args.project));
    for run in &runs {
        let elapsed = run
            .execution_time()
            .map(|s| format!(" in {}", humanize_time(s)))
            .unwrap_or_default();
        println!(
            "  {}  {:<24} {:<12} {}{}",
            run.id,
            run.pipeline_name,
            run.status,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            elapsed
        );
    }
    Ok(0)
}

/// Print a run; the exit code mirrors its status
pub fn status(server: &RpcServer, args: StatusArgs) -> Result<i32> {
    let run = server.run_handler().get_run(&args.run)?;
    output::header(&format!("Run {} ({})", run.id, run.pipeline_name));
    println!("  status:   {}", run.status);
    if let Some(label) = run.current_step_label() {
        println!("  current:  {}", label);
    }
    if let Some(previous) = run.resumed_from {
        println!("  resumes:  {}", previous);
    }
    if let Some(seconds) = run.execution_time() {
        println!("  duration: {}", humanize_time(seconds));
    }

    println!();
    for (index, step) in run.steps.iter().enumerate() {
        let duration = step
            .duration()
            .map(|d| format!(" ({:.2}s)", d.num_milliseconds() as f64 / 1000.0))
            .unwrap_or_default();
        println!(
            "  {:>2}. {:<4} {}{}",
            index + 1,
            output::step_symbol(step.status),
            step.name,
            duration
        );
        if let Some(error) = &step.error {
            output::dim_failure(&format!("          {}", error));
        }
    }

    if let Some(diagnostics) = &run.diagnostics {
        println!();
        output::error(diagnostics);
    }
    if args.log {
        println!();
        for line in &run.log {
            println!("  {}", line);
        }
    }
    Ok(run.status.exit_code())
}

/// Stop a run; a run executing in another process is signalled through a marker file
pub fn stop(server: &RpcServer, args: RunRefArgs) -> Result<i32> {
    let run = server.run_handler().get_run(&args.run)?;
    match run.status {
        RunStatus::Running => {
            let dir = server.config().stop_dir();
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(format!("{}.stop", run.id)), b"")?;
            output::success("Stop requested; the run stops at its next step boundary");
        }
        RunStatus::NotStarted | RunStatus::Queued => {
            server.run_handler().stop_run(&args.run)?;
            server.save()?;
            output::success(&format!("Run {} stopped", run.id));
        }
        status => output::info(&format!("Run {} already {}", run.id, status)),
    }
    Ok(0)
}

pub async fn resume(server: &RpcServer, args: ResumeRunArgs) -> Result<i32> {
    let run = server.run_handler().resume_run(&args.run)?;
    server.save()?;
    output::success(&format!("Run {} created from {}", run.id, args.run));

    if args.execute {
        let run = execute_one(server, run.id).await?;
        return Ok(run.status.exit_code());
    }
    Ok(0)
}
