use crate::output;

use std::io::{self, Write};

use clap::Args;
use color_eyre::Result;

use scanflow_rpc::RpcServer;

/// Write a report of a project
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Project name or id
    pub project: String,

    /// Report format: json, csv, cyclonedx, spdx or summary
    #[arg(long, short = 'f', default_value = "json")]
    pub format: String,

    /// Print the report on stdout instead of writing it to the output directory
    #[arg(long)]
    pub print: bool,
}

pub fn output(server: &RpcServer, args: OutputArgs) -> Result<i32> {
    let reports = server.report_handler();
    if args.print {
        let content = reports.render(&args.project, &args.format)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(&content)?;
        stdout.flush()?;
        return Ok(0);
    }

    let path = reports.write_report(&args.project, &args.format)?;
    output::success(&format!("Report written to {}", path.display()));
    println!("{}", path.display());
    Ok(0)
}
