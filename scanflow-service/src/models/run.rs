// Run Model
// One execution of one pipeline against one project, with its state machine

use crate::error::{ServiceError, ServiceResult};
use crate::models::project::ProjectId;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type RunId = Uuid;

/// Run lifecycle status
///
/// `NotStarted → Queued → Running → {Succeeded, Failed, Stopped}`, plus
/// `NotStarted/Queued → Stopped` when a stop arrives before execution.
/// Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Queued,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Stopped
        )
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (NotStarted, Queued)
                | (NotStarted, Running)
                | (NotStarted, Stopped)
                | (Queued, Running)
                | (Queued, Stopped)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Stopped)
        )
    }

    /// Process exit code mirroring the status
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => 1,
            RunStatus::Stopped => 2,
            RunStatus::NotStarted | RunStatus::Queued | RunStatus::Running => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Snapshot of one step, fixed when the run is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub stop_on_failure: bool,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            groups: Vec::new(),
            stop_on_failure: false,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }

    /// Fresh copy for a resumed run; completed steps keep their markers
    fn reset_for_resume(&self) -> Self {
        if self.is_completed() {
            return self.clone();
        }
        Self {
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            ..self.clone()
        }
    }
}

/// Options selected when the run is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Keep going after a recoverable step failure (unless the step is stop-on-failure)
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Only include steps without groups or with an intersecting group
    #[serde(default)]
    pub selected_groups: Option<Vec<String>>,
}

/// One execution of a pipeline against a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub project: ProjectId,
    pub pipeline_name: String,
    pub steps: Vec<StepRecord>,
    pub current_step: Option<usize>,
    pub status: RunStatus,
    pub options: RunOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log: Vec<String>,
    pub diagnostics: Option<String>,
    #[serde(default)]
    pub stop_requested: bool,
    pub resumed_from: Option<RunId>,
}

impl Run {
    pub fn new(
        project: ProjectId,
        pipeline_name: impl Into<String>,
        steps: Vec<StepRecord>,
        options: RunOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project,
            pipeline_name: pipeline_name.into(),
            steps,
            current_step: None,
            status: RunStatus::NotStarted,
            options,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            log: Vec::new(),
            diagnostics: None,
            stop_requested: false,
            resumed_from: None,
        }
    }

    /// Build a new run that re-executes the non-completed steps of `previous`
    pub fn resume_from(previous: &Run) -> ServiceResult<Run> {
        if !matches!(previous.status, RunStatus::Failed | RunStatus::Stopped) {
            return Err(ServiceError::RunNotResumable(previous.id, previous.status));
        }

        let mut run = Run::new(
            previous.project,
            previous.pipeline_name.clone(),
            previous.steps.iter().map(StepRecord::reset_for_resume).collect(),
            previous.options.clone(),
        );
        run.resumed_from = Some(previous.id);
        Ok(run)
    }

    /// Apply a status transition, recording start/end timestamps
    pub fn transition(&mut self, next: RunStatus) -> ServiceResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == RunStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
            self.current_step = None;
        }
        self.status = next;
        Ok(())
    }

    /// Append a timestamped line to the run log
    pub fn append_to_log(&mut self, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        self.log.push(format!("{} {}", stamp, message));
    }

    /// Index of the first step that has not completed
    pub fn first_pending_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.is_completed())
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed)
    }

    /// Succeeded, but at least one step failed and was tolerated
    pub fn succeeded_with_issues(&self) -> bool {
        self.status == RunStatus::Succeeded && self.failed_steps().next().is_some()
    }

    /// Wall-clock execution time in seconds, once the run has finished
    pub fn execution_time(&self) -> Option<f64> {
        let elapsed = self.ended_at? - self.started_at?;
        Some(elapsed.num_milliseconds() as f64 / 1000.0)
    }

    /// Label such as "2/5 collect_and_create_codebase_resources"
    pub fn current_step_label(&self) -> Option<String> {
        let index = self.current_step?;
        let step = self.steps.get(index)?;
        Some(format!("{}/{} {}", index + 1, self.steps.len(), step.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_run() -> Run {
        Run::new(
            Uuid::new_v4(),
            "scan_codebase",
            vec![StepRecord::new("a", ""), StepRecord::new("b", "")],
            RunOptions::default(),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = make_run();
        run.transition(RunStatus::Queued).unwrap();
        run.transition(RunStatus::Running).unwrap();
        assert!(run.started_at.is_some());
        run.transition(RunStatus::Succeeded).unwrap();
        assert!(run.ended_at.is_some());
        assert!(run.execution_time().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Stopped] {
            for next in [
                RunStatus::NotStarted,
                RunStatus::Queued,
                RunStatus::Running,
                RunStatus::Succeeded,
                RunStatus::Failed,
                RunStatus::Stopped,
            ] {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }

        let mut run = make_run();
        run.transition(RunStatus::Running).unwrap();
        run.transition(RunStatus::Failed).unwrap();
        let err = run.transition(RunStatus::Running).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[test]
    fn test_stop_before_execution() {
        let mut run = make_run();
        run.transition(RunStatus::Queued).unwrap();
        run.transition(RunStatus::Stopped).unwrap();
        assert_eq!(run.status.exit_code(), 2);
    }

    #[test]
    fn test_resume_keeps_completed_steps() {
        let mut run = make_run();
        run.transition(RunStatus::Running).unwrap();
        run.steps[0].status = StepStatus::Completed;
        run.steps[1].status = StepStatus::Failed;
        run.steps[1].error = Some("boom".to_string());
        run.transition(RunStatus::Failed).unwrap();

        let resumed = Run::resume_from(&run).unwrap();
        assert_ne!(resumed.id, run.id);
        assert_eq!(resumed.resumed_from, Some(run.id));
        assert_eq!(resumed.status, RunStatus::NotStarted);
        assert_eq!(resumed.steps[0].status, StepStatus::Completed);
        assert_eq!(resumed.steps[1].status, StepStatus::Pending);
        assert!(resumed.steps[1].error.is_none());
        assert_eq!(resumed.first_pending_step(), Some(1));
    }

    #[test]
    fn test_resume_rejects_succeeded_run() {
        let mut run = make_run();
        run.transition(RunStatus::Running).unwrap();
        run.transition(RunStatus::Succeeded).unwrap();
        assert!(matches!(
            Run::resume_from(&run),
            Err(ServiceError::RunNotResumable(_, RunStatus::Succeeded))
        ));
    }

    #[test]
    fn test_log_lines_are_timestamped() {
        let mut run = make_run();
        run.append_to_log("Pipeline [scan_codebase] starting");
        assert!(run.log[0].ends_with(" Pipeline [scan_codebase] starting"));
        assert!(run.log[0].len() > "Pipeline [scan_codebase] starting".len() + 20);
    }
}
