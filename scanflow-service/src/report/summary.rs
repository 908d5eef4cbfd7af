// Summary Report
// Plain-text overview of a project for terminals

use crate::report::{ReportEncoder, ReportResult, TOOL_NAME, TOOL_VERSION};
use crate::store::ProjectSnapshot;
use crate::utils::humanize_time;

use std::collections::BTreeMap;
use std::fmt::Write;

fn section<K: std::fmt::Display>(out: &mut String, title: &str, counts: &BTreeMap<K, usize>) {
    let _ = writeln!(out, "\n{}:", title);
    if counts.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (key, count) in counts {
        let _ = writeln!(out, "  {:<32} {}", key.to_string(), count);
    }
}

pub struct SummaryEncoder;

impl SummaryEncoder {
    pub fn render(&self, snapshot: &ProjectSnapshot) -> String {
        let mut out = String::new();
        let project = &snapshot.project;
        let _ = writeln!(out, "Project: {} ({})", project.name, project.id);
        let _ = writeln!(out, "Generated by {} {}", TOOL_NAME, TOOL_VERSION);

        let _ = writeln!(out, "\nRuns:");
        if snapshot.runs.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        let mut runs: Vec<_> = snapshot.runs.iter().collect();
        runs.sort_by_key(|r| r.created_at);
        for run in runs {
            let mut line = format!("  {} {} {}", run.id, run.pipeline_name, run.status);
            if run.succeeded_with_issues() {
                line.push_str(" (with failed steps)");
            }
            if let Some(seconds) = run.execution_time() {
                line.push_str(&format!(" in {}", humanize_time(seconds)));
            }
            let _ = writeln!(out, "{}", line);
        }

        let counts = snapshot.object_counts();
        let _ = writeln!(out, "\nObjects:");
        let _ = writeln!(
            out,
            "  resources {} (files {}, directories {})",
            counts.resources, counts.files, counts.directories
        );
        let _ = writeln!(out, "  packages {}", counts.packages);
        let _ = writeln!(out, "  dependencies {}", counts.dependencies);
        let _ = writeln!(out, "  relations {}", counts.relations);
        let _ = writeln!(out, "  messages {}", counts.messages);

        section(&mut out, "Resource status", &snapshot.status_counts());
        section(&mut out, "Licenses", &snapshot.license_summary());

        let deps = snapshot.dependency_summary();
        let _ = writeln!(out, "\nDependencies:");
        let _ = writeln!(
            out,
            "  total {}, resolved {}, unresolved {}, runtime {}, optional {}",
            deps.total, deps.resolved, deps.unresolved, deps.runtime, deps.optional
        );
        for (scope, count) in &deps.by_scope {
            let _ = writeln!(out, "  {:<32} {}", scope, count);
        }

        section(&mut out, "Messages", &snapshot.message_counts());
        let _ = writeln!(out, "\nVulnerable packages: {}", snapshot.vulnerable_packages());
        out
    }
}

impl ReportEncoder for SummaryEncoder {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn extension(&self) -> &'static str {
        "txt"
    }

    fn encode(&self, snapshot: &ProjectSnapshot) -> ReportResult<Vec<u8>> {
        Ok(self.render(snapshot).into_bytes())
    }
}
