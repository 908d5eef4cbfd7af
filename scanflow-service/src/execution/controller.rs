// Run Controller
// Drives a run through its step snapshot and the run state machine

use crate::error::{ServiceError, ServiceResult, StepError};
use crate::execution::cancel::CancelToken;
use crate::execution::context::{append_run_log, StepContext};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::models::{ProjectId, ProjectMessage, Run, RunId, RunOptions, RunStatus, StepStatus};
use crate::registry::{parse_pipeline_selection, StepRegistry};
use crate::steps::ExternalServices;
use crate::store::Store;
use crate::utils::humanize_time;

use chrono::Utc;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{error, info, warn};

/// How the step loop ended
enum Outcome {
    Completed,
    Aborted,
    Stopped,
}

/// Executes runs; one controller is shared by every worker
pub struct RunController {
    store: Arc<Store>,
    registry: Arc<StepRegistry>,
    services: ExternalServices,
    cancellations: Mutex<HashMap<RunId, CancelToken>>,
    event_tx: Option<ProgressSender>,
    /// Directory where `<run id>.stop` marker files request a stop from another process
    stop_dir: Option<PathBuf>,
}

impl RunController {
    pub fn new(store: Arc<Store>, registry: Arc<StepRegistry>) -> Self {
        Self {
            store,
            registry,
            services: ExternalServices::default(),
            cancellations: Mutex::new(HashMap::new()),
            event_tx: None,
            stop_dir: None,
        }
    }

    pub fn with_services(mut self, services: ExternalServices) -> Self {
        self.services = services;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_stop_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stop_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    // =========================================================================
    // Run lifecycle
    // =========================================================================

    /// Create a run with its step snapshot
    ///
    /// `pipeline` accepts the `name:group1,group2` selection syntax; a group
    /// selection there replaces the one in `options`.
    pub fn create_run(&self, project: ProjectId, pipeline: &str, mut options: RunOptions) -> ServiceResult<Run> {
        self.store.project(project)?;
        let (name, groups) = parse_pipeline_selection(pipeline);
        if groups.is_some() {
            options.selected_groups = groups;
        }

        let definition = self.registry.resolve(&name)?;
        if definition.is_addon && self.store.runs_for_project(project).is_empty() {
            return Err(ServiceError::AddonPipelineFirst(definition.name.clone()));
        }

        let steps = self
            .registry
            .resolve_steps(&name, options.selected_groups.as_deref())?
            .iter()
            .map(|s| s.record())
            .collect();
        let run = Run::new(project, definition.name.clone(), steps, options);
        info!(run = %run.id, pipeline = %run.pipeline_name, "run created");
        self.store.insert_run(run.clone())?;
        Ok(run)
    }

    /// Mark a run as handed to the queue
    pub fn enqueue(&self, run_id: RunId) -> ServiceResult<Run> {
        self.store.modify_run(run_id, |run| {
            run.transition(RunStatus::Queued)?;
            Ok(run.clone())
        })
    }

    /// Shared cancellation signal of a run
    pub fn cancel_token(&self, run_id: RunId) -> CancelToken {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(run_id)
            .or_default()
            .clone()
    }

    fn registered_token(&self, run_id: RunId) -> Option<CancelToken> {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&run_id)
            .cloned()
    }

    /// Request a stop
    ///
    /// A run that has not started is stopped at once. A running run stops at
    /// the next step boundary. Terminal runs are left untouched.
    pub fn stop(&self, run_id: RunId) -> ServiceResult<Run> {
        let stopped_now = self.store.modify_run(run_id, |run| match run.status {
            RunStatus::NotStarted | RunStatus::Queued => {
                run.transition(RunStatus::Stopped)?;
                Ok(true)
            }
            RunStatus::Running => {
                run.stop_requested = true;
                Ok(false)
            }
            _ => Ok(false),
        })?;

        let run = self.store.run(run_id)?;
        if stopped_now {
            self.log(run_id, "Pipeline stopped before execution");
            self.warn(&run, "Run stopped before execution");
        } else if run.status == RunStatus::Running {
            // the stored flag covers runs without a registered token
            if let Some(token) = self.registered_token(run_id) {
                token.cancel();
            }
            info!(run = %run_id, "stop requested");
        }
        self.store.run(run_id)
    }

    /// Create a new run re-executing the steps a failed or stopped run did not complete
    pub fn resume(&self, run_id: RunId) -> ServiceResult<Run> {
        let previous = self.store.run(run_id)?;
        let run = Run::resume_from(&previous)?;
        self.store.insert_run(run.clone())?;
        self.log(run.id, &format!("Resuming run {}", previous.id));
        self.store.run(run.id)
    }

    fn is_stop_requested(&self, run_id: RunId) -> bool {
        if self.registered_token(run_id).is_some_and(|t| t.is_cancelled()) {
            return true;
        }
        if self.store.run(run_id).is_ok_and(|r| r.stop_requested) {
            return true;
        }
        self.stop_dir
            .as_ref()
            .is_some_and(|dir| dir.join(format!("{}.stop", run_id)).exists())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute a run to a terminal state and return the final record
    pub async fn execute(&self, run_id: RunId) -> ServiceResult<Run> {
        let run = self.store.modify_run(run_id, |run| {
            run.transition(RunStatus::Running)?;
            Ok(run.clone())
        })?;

        let start = Instant::now();
        self.log(run_id, &format!("Pipeline [{}] starting", run.pipeline_name));
        self.event_tx.send_event(ExecutionEvent::run_started(
            run_id,
            &run.pipeline_name,
            run.steps.len(),
        ));

        let status = match self.execute_steps(&run).await {
            Ok(Outcome::Completed) => RunStatus::Succeeded,
            Ok(Outcome::Aborted) => RunStatus::Failed,
            Ok(Outcome::Stopped) => RunStatus::Stopped,
            Err(err) => {
                error!(run = %run_id, error = %err, "run aborted by an engine error");
                self.record_defect(&run, None, &err.to_string());
                RunStatus::Failed
            }
        };

        self.finish(&run, status, start)?;
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);
        self.store.run(run_id)
    }

    async fn execute_steps(&self, run: &Run) -> ServiceResult<Outcome> {
        let total = run.steps.len();

        for (index, record) in run.steps.iter().enumerate() {
            if record.is_completed() {
                self.event_tx.send_event(ExecutionEvent::step_skipped(
                    run.id,
                    &record.name,
                    index,
                    "completed in a previous run",
                ));
                continue;
            }

            if self.is_stop_requested(run.id) {
                self.skip_remaining(run, index, "run stopped")?;
                return Ok(Outcome::Stopped);
            }

            let Some(descriptor) = self.registry.find_step(&run.pipeline_name, &record.name) else {
                let message = format!(
                    "step {} is not registered for pipeline {}",
                    record.name, run.pipeline_name
                );
                self.set_step(run.id, index, StepStatus::Failed, Some(message.clone()))?;
                self.record_defect(run, Some(&record.name), &message);
                self.skip_remaining(run, index + 1, "run aborted")?;
                return Ok(Outcome::Aborted);
            };

            self.set_step(run.id, index, StepStatus::Running, None)?;
            self.log(run.id, &format!("Step [{}] starting", record.name));
            self.event_tx
                .send_event(ExecutionEvent::step_started(run.id, &record.name, index, total));

            let ctx = StepContext::new(
                self.store.project(run.project)?,
                run.id,
                run.pipeline_name.clone(),
                record.name.clone(),
                self.store.clone(),
                self.services.clone(),
                self.event_tx.clone(),
            )?;
            let step_start = Instant::now();
            let result = AssertUnwindSafe(descriptor.step.run(&ctx)).catch_unwind().await;
            let elapsed = step_start.elapsed();

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) => Some(StepError::defect(format!(
                    "step {} panicked: {}",
                    record.name,
                    panic_message(payload.as_ref())
                ))),
            };

            let Some(err) = failure else {
                self.set_step(run.id, index, StepStatus::Completed, None)?;
                self.log(
                    run.id,
                    &format!(
                        "Step [{}] completed in {}",
                        record.name,
                        humanize_time(elapsed.as_secs_f64())
                    ),
                );
                self.event_tx.send_event(ExecutionEvent::step_completed(
                    run.id,
                    &record.name,
                    index,
                    StepStatus::Completed,
                    elapsed,
                ));
                continue;
            };

            self.set_step(run.id, index, StepStatus::Failed, Some(err.to_string()))?;
            self.event_tx.send_event(ExecutionEvent::step_completed(
                run.id,
                &record.name,
                index,
                StepStatus::Failed,
                elapsed,
            ));

            if err.is_recoverable() {
                warn!(run = %run.id, step = %record.name, error = %err, "step failed");
                ctx.add_error(err.to_string());
                self.log(run.id, &format!("Step [{}] failed: {}", record.name, err));
                if record.stop_on_failure || !run.options.continue_on_failure {
                    self.skip_remaining(run, index + 1, "run aborted")?;
                    return Ok(Outcome::Aborted);
                }
            } else {
                error!(run = %run.id, step = %record.name, error = %err, "step defect");
                self.record_defect(run, Some(&record.name), &err.diagnostics());
                self.skip_remaining(run, index + 1, "run aborted")?;
                return Ok(Outcome::Aborted);
            }
        }

        Ok(Outcome::Completed)
    }

    fn finish(&self, run: &Run, status: RunStatus, start: Instant) -> ServiceResult<()> {
        self.store.modify_run(run.id, |r| {
            r.stop_requested = false;
            r.transition(status)
        })?;

        match status {
            RunStatus::Succeeded => self.log(
                run.id,
                &format!("Pipeline completed in {}", humanize_time(start.elapsed().as_secs_f64())),
            ),
            RunStatus::Stopped => {
                self.log(run.id, "Pipeline stopped");
                self.warn(run, "Run stopped at a step boundary");
            }
            _ => self.log(run.id, "Pipeline failed"),
        }

        self.event_tx
            .send_event(ExecutionEvent::run_completed(run.id, status, start.elapsed()));
        Ok(())
    }

    fn set_step(&self, run_id: RunId, index: usize, status: StepStatus, error: Option<String>) -> ServiceResult<()> {
        self.store.modify_run(run_id, |run| {
            let now = Utc::now();
            if status == StepStatus::Running {
                run.current_step = Some(index);
            }
            if let Some(step) = run.steps.get_mut(index) {
                match status {
                    StepStatus::Running => step.started_at = Some(now),
                    StepStatus::Completed | StepStatus::Failed => step.ended_at = Some(now),
                    _ => {}
                }
                step.status = status;
                step.error = error;
            }
            Ok(())
        })
    }

    fn skip_remaining(&self, run: &Run, from: usize, reason: &str) -> ServiceResult<()> {
        for (index, record) in run.steps.iter().enumerate().skip(from) {
            if record.is_completed() {
                continue;
            }
            self.set_step(run.id, index, StepStatus::Skipped, None)?;
            self.event_tx
                .send_event(ExecutionEvent::step_skipped(run.id, &record.name, index, reason));
        }
        Ok(())
    }

    /// Keep full diagnostics on the run and an ERROR message with the traceback
    fn record_defect(&self, run: &Run, step: Option<&str>, diagnostics: &str) {
        if let Err(err) = self.store.modify_run(run.id, |r| {
            r.diagnostics = Some(diagnostics.to_string());
            Ok(())
        }) {
            warn!(run = %run.id, error = %err, "failed to record diagnostics");
        }

        let model = step.unwrap_or(&run.pipeline_name);
        let summary = diagnostics.lines().next().unwrap_or(diagnostics);
        let message = ProjectMessage::error(run.project, model, summary)
            .with_run(run.id)
            .with_traceback(diagnostics);
        self.add_message(message);
    }

    fn warn(&self, run: &Run, description: &str) {
        let message = ProjectMessage::warning(run.project, run.pipeline_name.clone(), description)
            .with_run(run.id);
        self.add_message(message);
    }

    fn add_message(&self, message: ProjectMessage) {
        let event = ExecutionEvent::message(message.run.unwrap_or_default(), message.severity, &message.description);
        let recorded = self
            .store
            .scope(message.project)
            .and_then(|scope| scope.add_message(message).map_err(ServiceError::from));
        match recorded {
            Ok(()) => self.event_tx.send_event(event),
            Err(err) => warn!(error = %err, "failed to record project message"),
        }
    }

    fn log(&self, run_id: RunId, message: &str) {
        append_run_log(&self.store, &self.event_tx, run_id, message);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
