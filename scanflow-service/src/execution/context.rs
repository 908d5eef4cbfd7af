// Step Context
// What a running step can see: its project, a scoped store handle and the run log

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::models::{Project, ProjectMessage, RunId, Severity};
use crate::steps::ExternalServices;
use crate::store::{ProjectScope, Store};

use std::fmt::Display;
use std::sync::Arc;
use tracing::{info, warn};

/// Context handed to a step for the duration of one invocation
pub struct StepContext {
    project: Project,
    run_id: RunId,
    pipeline_name: String,
    step_name: String,
    scope: ProjectScope,
    services: ExternalServices,
    store: Arc<Store>,
    event_tx: Option<ProgressSender>,
}

impl StepContext {
    pub(crate) fn new(
        project: Project,
        run_id: RunId,
        pipeline_name: String,
        step_name: String,
        store: Arc<Store>,
        services: ExternalServices,
        event_tx: Option<ProgressSender>,
    ) -> Result<Self, crate::error::ServiceError> {
        let scope = store.scope(project.id)?;
        Ok(Self {
            project,
            run_id,
            pipeline_name,
            step_name,
            scope,
            services,
            store,
            event_tx,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Store handle bound to this run's project
    pub fn scope(&self) -> &ProjectScope {
        &self.scope
    }

    pub fn services(&self) -> &ExternalServices {
        &self.services
    }

    /// Append a timestamped line to the run log
    pub fn log(&self, message: impl AsRef<str>) {
        append_run_log(&self.store, &self.event_tx, self.run_id, message.as_ref());
    }

    /// Record a project message attributed to the current step
    pub fn add_message(&self, message: ProjectMessage) {
        let event = ExecutionEvent::message(self.run_id, message.severity, &message.description);
        if let Err(err) = self.scope.add_message(message.with_run(self.run_id)) {
            warn!(error = %err, "failed to record project message");
            return;
        }
        self.event_tx.send_event(event);
    }

    /// Record an ERROR message for the current step
    pub fn add_error(&self, description: impl Into<String>) {
        self.add_message(ProjectMessage::error(
            self.project.id,
            self.step_name.clone(),
            description,
        ));
    }

    pub fn add_warning(&self, description: impl Into<String>) {
        self.add_message(ProjectMessage::new(
            self.project.id,
            Severity::Warning,
            self.step_name.clone(),
            description,
        ));
    }

    /// Keep going past an error: record it as an ERROR message and return `None`
    pub fn save_errors<T, E: Display>(&self, result: Result<T, E>, resource_path: Option<&str>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let mut message =
                    ProjectMessage::error(self.project.id, self.step_name.clone(), err.to_string());
                if let Some(path) = resource_path {
                    message = message.for_resource(path);
                }
                self.add_message(message);
                None
            }
        }
    }
}

/// Timestamp a log line, write it to the run record and broadcast it
pub(crate) fn append_run_log(
    store: &Store,
    event_tx: &Option<ProgressSender>,
    run_id: RunId,
    message: &str,
) {
    info!(run = %run_id, "{}", message);
    let stored = store.modify_run(run_id, |run| {
        run.append_to_log(message);
        Ok(run.log.last().cloned().unwrap_or_default())
    });
    match stored {
        Ok(line) => event_tx.send_event(ExecutionEvent::log(run_id, line)),
        Err(err) => warn!(run = %run_id, error = %err, "failed to append to run log"),
    }
}
