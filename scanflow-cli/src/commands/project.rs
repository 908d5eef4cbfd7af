use crate::commands::run::{add_pipelines, execute_pending};
use crate::output;

use clap::Args;
use color_eyre::Result;

use scanflow_rpc::{RpcError, RpcServer};
use scanflow_service::models::{ProjectSettings, RunOptions};

/// Create a project
#[derive(Args, Debug)]
pub struct CreateProjectArgs {
    /// Unique project name
    pub name: String,

    /// Input file path or URL, with an optional tag (`path:tag`, `url#tag`)
    #[arg(long = "input", short = 'i', value_name = "PATH|URL")]
    pub inputs: Vec<String>,

    /// Pipeline to add, with optional groups (`name:group1,group2`)
    #[arg(long = "pipeline", short = 'p', value_name = "NAME")]
    pub pipelines: Vec<String>,

    /// Glob pattern of resources to ignore (can be repeated)
    #[arg(long = "ignore", value_name = "PATTERN")]
    pub ignored_patterns: Vec<String>,

    /// Keep running after a step fails, unless the step stops on failure
    #[arg(long)]
    pub continue_on_failure: bool,

    /// Execute the added pipelines right away
    #[arg(long)]
    pub execute: bool,
}

/// Add inputs to a project
#[derive(Args, Debug)]
pub struct AddInputArgs {
    /// Project name or id
    pub project: String,

    /// Input file paths or URLs, with an optional tag (`path:tag`, `url#tag`)
    #[arg(required = true, value_name = "PATH|URL")]
    pub inputs: Vec<String>,
}

/// Delete a project
#[derive(Args, Debug)]
pub struct DeleteProjectArgs {
    /// Project name or id
    pub project: String,

    /// Keep the work directory on disk
    #[arg(long)]
    pub keep_files: bool,
}

pub async fn create(server: &RpcServer, args: CreateProjectArgs) -> Result<i32> {
    if args.execute && args.pipelines.is_empty() {
        return Err(RpcError::InvalidRequest("--execute requires at least one --pipeline".to_string()).into());
    }

    let settings = ProjectSettings {
        ignored_patterns: args.ignored_patterns,
        ..Default::default()
    };
    let project = server.project_handler().create_project(&args.name, settings)?;
    output::success(&format!(
        "Project {} created in {}",
        project.name,
        project.work_directory.display()
    ));

    for input in &args.inputs {
        let source = server.project_handler().add_input(&project.name, input)?;
        output::info(&format!("Input {} added", source.filename));
    }

    let options = RunOptions {
        continue_on_failure: args.continue_on_failure,
        ..Default::default()
    };
    add_pipelines(server, &project.name, &args.pipelines, &options)?;
    server.save()?;

    if args.execute {
        return execute_pending(server, &project.name).await;
    }
    Ok(0)
}

pub fn add_input(server: &RpcServer, args: AddInputArgs) -> Result<i32> {
    for input in &args.inputs {
        let source = server.project_handler().add_input(&args.project, input)?;
        let origin = if source.is_uploaded { "copied" } else { "registered" };
        output::success(&format!("Input {} {}", source.filename, origin));
    }
    server.save()?;
    Ok(0)
}

pub fn delete(server: &RpcServer, args: DeleteProjectArgs) -> Result<i32> {
    let project = server
        .project_handler()
        .delete_project(&args.project, !args.keep_files)?;
    server.save()?;
    output::success(&format!("Project {} deleted", project.name));
    Ok(0)
}
