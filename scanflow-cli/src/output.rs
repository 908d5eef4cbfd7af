// Output formatting helpers for CLI commands

use scanflow_service::{ExecutionEvent, RunStatus, Severity, StepStatus};

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a dim success message
pub fn dim_success(message: &str) {
    eprintln!("\x1b[32m{}\x1b[0m", message);
}

/// Print a dim failure message
pub fn dim_failure(message: &str) {
    eprintln!("\x1b[31m{}\x1b[0m", message);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Print the final line of a run in the color of its status
pub fn run_status(status: RunStatus, message: &str) {
    match status {
        RunStatus::Succeeded => success(message),
        RunStatus::Stopped => warning(message),
        RunStatus::Failed => failure(message),
        _ => info(message),
    }
}

/// Short label of a step status for tables
pub fn step_symbol(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Completed => "OK",
        StepStatus::Failed => "FAIL",
        StepStatus::Skipped => "SKIP",
        StepStatus::Running => "RUN",
        StepStatus::Pending => "..",
    }
}

/// Render one execution event on stderr
pub fn event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            pipeline_name,
            total_steps,
            ..
        } => {
            eprintln!();
            header(&format!("Pipeline '{}' ({} steps)", pipeline_name, total_steps));
        }

        ExecutionEvent::RunCompleted {
            status, duration, ..
        } => {
            run_status(
                *status,
                &format!("Run {} in {:.2}s", status, duration.as_secs_f64()),
            );
        }

        ExecutionEvent::StepStarted {
            step_name,
            step_index,
            total_steps,
            ..
        } => {
            eprintln!("  [Step {}/{}] {}", step_index + 1, total_steps, step_name);
        }

        ExecutionEvent::StepCompleted {
            status, duration, ..
        } => {
            let line = format!("        {} ({:.2}s)", step_symbol(*status), duration.as_secs_f64());
            if *status == StepStatus::Completed {
                dim_success(&line);
            } else {
                dim_failure(&line);
            }
        }

        ExecutionEvent::StepSkipped {
            step_name, reason, ..
        } => {
            dim(&format!("        {} skipped: {}", step_name, reason));
        }

        ExecutionEvent::Message {
            severity,
            description,
            ..
        } => match severity {
            Severity::Error => error(description),
            Severity::Warning => warning(description),
            Severity::Info => info(description),
        },

        // Log lines duplicate the events above; shown by `status --log`
        ExecutionEvent::Log { .. } => {}
    }
}
