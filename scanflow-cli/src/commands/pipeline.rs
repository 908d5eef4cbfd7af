use crate::output;

use clap::Args;
use color_eyre::Result;

use scanflow_rpc::RpcServer;

/// List the available pipelines
#[derive(Args, Debug)]
pub struct ListPipelinesArgs {
    /// Also list the steps of each pipeline
    #[arg(long)]
    pub steps: bool,
}

pub fn list(server: &RpcServer, args: ListPipelinesArgs) -> Result<i32> {
    let pipelines = server.run_handler().list_pipelines()?;
    output::status("Pipelines", &format!("{} available", pipelines.len()));

    for pipeline in &pipelines {
        let addon = if pipeline.is_addon { " [addon]" } else { "" };
        println!("  {}{}", pipeline.name, addon);
        output::dim(&format!("      {}", pipeline.summary));
        if !pipeline.available_groups.is_empty() {
            output::dim(&format!("      groups: {}", pipeline.available_groups.join(", ")));
        }
        if args.steps {
            for (index, step) in pipeline.steps.iter().enumerate() {
                let groups = if step.groups.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", step.groups.join(", "))
                };
                println!("      {}. {}{}", index + 1, step.name, groups);
            }
        }
    }
    Ok(0)
}
