// Execution Events
// Progress reporting and event types for run execution

use crate::models::{RunId, RunStatus, Severity, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a run executes
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run moved to RUNNING
    RunStarted {
        run_id: RunId,
        pipeline_name: String,
        total_steps: usize,
    },

    /// Run reached a terminal status
    RunCompleted {
        run_id: RunId,
        status: RunStatus,
        duration: Duration,
    },

    /// Step execution started
    StepStarted {
        run_id: RunId,
        step_name: String,
        step_index: usize,
        total_steps: usize,
    },

    /// Step execution completed (successfully or not)
    StepCompleted {
        run_id: RunId,
        step_name: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
    },

    /// Step was skipped (already completed, or the run aborted)
    StepSkipped {
        run_id: RunId,
        step_name: String,
        step_index: usize,
        reason: String,
    },

    /// A project message was recorded
    Message {
        run_id: RunId,
        severity: Severity,
        description: String,
    },

    /// Run log line
    Log { run_id: RunId, line: String },
}

impl ExecutionEvent {
    /// Create a run started event
    pub fn run_started(run_id: RunId, pipeline_name: impl Into<String>, total_steps: usize) -> Self {
        Self::RunStarted {
            run_id,
            pipeline_name: pipeline_name.into(),
            total_steps,
        }
    }

    /// Create a run completed event
    pub fn run_completed(run_id: RunId, status: RunStatus, duration: Duration) -> Self {
        Self::RunCompleted {
            run_id,
            status,
            duration,
        }
    }

    /// Create a step started event
    pub fn step_started(
        run_id: RunId,
        step_name: impl Into<String>,
        step_index: usize,
        total_steps: usize,
    ) -> Self {
        Self::StepStarted {
            run_id,
            step_name: step_name.into(),
            step_index,
            total_steps,
        }
    }

    /// Create a step completed event
    pub fn step_completed(
        run_id: RunId,
        step_name: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            run_id,
            step_name: step_name.into(),
            step_index,
            status,
            duration,
        }
    }

    /// Create a step skipped event
    pub fn step_skipped(
        run_id: RunId,
        step_name: impl Into<String>,
        step_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            run_id,
            step_name: step_name.into(),
            step_index,
            reason: reason.into(),
        }
    }

    pub fn message(run_id: RunId, severity: Severity, description: impl Into<String>) -> Self {
        Self::Message {
            run_id,
            severity,
            description: description.into(),
        }
    }

    pub fn log(run_id: RunId, line: impl Into<String>) -> Self {
        Self::Log {
            run_id,
            line: line.into(),
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepSkipped { run_id, .. }
            | Self::Message { run_id, .. }
            | Self::Log { run_id, .. } => *run_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
