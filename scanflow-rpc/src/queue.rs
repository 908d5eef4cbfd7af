// Run Queue
// Hands queued runs to a pool of workers and enforces the per-run wall-clock ceiling

use crate::error::{RpcError, RpcResult};

use scanflow_service::models::{ProjectMessage, Run, RunId};
use scanflow_service::RunController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Interval between two status checks in [`RunQueue::wait_for`]
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Worker pool executing runs in the order they were enqueued
pub struct RunQueue {
    controller: Arc<RunController>,
    tx: Option<mpsc::UnboundedSender<RunId>>,
    workers: Vec<JoinHandle<()>>,
}

impl RunQueue {
    /// Spawn `workers` tasks on the current runtime
    pub fn start(controller: Arc<RunController>, workers: usize, timeout: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<RunId>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let controller = controller.clone();
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(run_id) = next else {
                            debug!(worker, "queue closed");
                            break;
                        };
                        debug!(worker, run = %run_id, "run picked up");
                        execute_with_timeout(&controller, run_id, timeout).await;
                    }
                })
            })
            .collect();

        Self {
            controller,
            tx: Some(tx),
            workers: handles,
        }
    }

    /// Move a run to QUEUED and hand it to the next free worker
    pub fn enqueue(&self, run_id: RunId) -> RpcResult<Run> {
        let run = self.controller.enqueue(run_id)?;
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| RpcError::InternalError("run queue is shut down".to_string()))?;
        tx.send(run_id)
            .map_err(|_| RpcError::InternalError("run queue workers are gone".to_string()))?;
        info!(run = %run_id, pipeline = %run.pipeline_name, "run queued");
        Ok(run)
    }

    /// Poll the store until the run reaches a terminal state
    pub async fn wait_for(&self, run_id: RunId) -> RpcResult<Run> {
        loop {
            let run = self.controller.store().run(run_id)?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Stop accepting runs and wait for the workers to drain the queue
    pub async fn shutdown(mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "queue worker panicked");
            }
        }
    }
}

/// Execute a run; past the ceiling the run is stopped through its cancellation signal
///
/// The step in flight is allowed to finish, the run then ends STOPPED at the
/// next step boundary.
pub async fn execute_with_timeout(controller: &RunController, run_id: RunId, timeout: Option<Duration>) {
    let execution = controller.execute(run_id);
    tokio::pin!(execution);

    let result = match timeout {
        Some(limit) => {
            tokio::select! {
                result = &mut execution => result,
                _ = tokio::time::sleep(limit) => {
                    warn!(run = %run_id, seconds = limit.as_secs_f64(), "run exceeded its time limit");
                    record_timeout(controller, run_id, limit);
                    if let Err(e) = controller.stop(run_id) {
                        warn!(run = %run_id, error = %e, "failed to stop timed out run");
                    }
                    execution.await
                }
            }
        }
        None => execution.await,
    };

    match result {
        Ok(run) => info!(run = %run_id, status = %run.status, "run finished"),
        Err(e) => error!(run = %run_id, error = %e, "run could not be executed"),
    }
}

fn record_timeout(controller: &RunController, run_id: RunId, limit: Duration) {
    let Ok(run) = controller.store().run(run_id) else {
        return;
    };
    let message = ProjectMessage::error(
        run.project,
        run.pipeline_name.clone(),
        format!("Run exceeded the time limit of {} seconds", limit.as_secs()),
    )
    .with_run(run_id);
    let recorded = controller
        .store()
        .scope(run.project)
        .map(|scope| scope.add_message(message));
    if !matches!(recorded, Ok(Ok(()))) {
        warn!(run = %run_id, "failed to record timeout message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanflow_service::models::{Project, ProjectId, RunOptions, RunStatus, Severity};
    use scanflow_service::registry::{PipelineDefinition, StepDescriptor};
    use scanflow_service::steps::Step;
    use scanflow_service::{StepContext, StepError, StepRegistry, Store};
    use tempfile::TempDir;

    struct Sleep(Duration);

    #[async_trait::async_trait]
    impl Step for Sleep {
        async fn run(&self, _ctx: &StepContext) -> Result<(), StepError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn controller(dir: &TempDir) -> (Arc<RunController>, ProjectId) {
        let store = Arc::new(Store::new());
        let project = store
            .create_project(Project::new("queue", dir.path()))
            .unwrap();
        project.setup_work_directory().unwrap();

        let registry = StepRegistry::builder()
            .register(
                PipelineDefinition::new("quick", "Quick pipeline")
                    .without_download()
                    .step(StepDescriptor::from_fn("noop", "Nothing", |_ctx| Ok(()))),
            )
            .unwrap()
            .register(
                PipelineDefinition::new("slow", "Slow pipeline")
                    .without_download()
                    .step(StepDescriptor::new("sleep", "Sleep", Sleep(Duration::from_millis(300))))
                    .step(StepDescriptor::from_fn("after", "Never reached", |_ctx| Ok(()))),
            )
            .unwrap()
            .build();
        (
            Arc::new(RunController::new(store, Arc::new(registry))),
            project.id,
        )
    }

    #[tokio::test]
    async fn test_queue_runs_to_completion() {
        let dir = TempDir::new().unwrap();
        let (controller, project) = controller(&dir);
        let queue = RunQueue::start(controller.clone(), 2, None);

        let runs: Vec<Run> = (0..3)
            .map(|_| controller.create_run(project, "quick", RunOptions::default()).unwrap())
            .collect();
        for run in &runs {
            assert_eq!(queue.enqueue(run.id).unwrap().status, RunStatus::Queued);
        }
        for run in &runs {
            assert_eq!(queue.wait_for(run.id).await.unwrap().status, RunStatus::Succeeded);
        }
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_stops_run_at_step_boundary() {
        let dir = TempDir::new().unwrap();
        let (controller, project) = controller(&dir);
        let queue = RunQueue::start(controller.clone(), 1, Some(Duration::from_millis(50)));

        let run = controller.create_run(project, "slow", RunOptions::default()).unwrap();
        queue.enqueue(run.id).unwrap();
        let run = queue.wait_for(run.id).await.unwrap();

        assert_eq!(run.status, RunStatus::Stopped);
        assert_eq!(run.steps[0].status, scanflow_service::StepStatus::Completed);
        assert_eq!(run.steps[1].status, scanflow_service::StepStatus::Skipped);

        let messages = controller.store().scope(project).unwrap().messages();
        assert!(messages
            .iter()
            .any(|m| m.severity == Severity::Error && m.description.contains("time limit")));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_rejects_terminal_run() {
        let dir = TempDir::new().unwrap();
        let (controller, project) = controller(&dir);
        let queue = RunQueue::start(controller.clone(), 1, None);

        let run = controller.create_run(project, "quick", RunOptions::default()).unwrap();
        controller.stop(run.id).unwrap();
        assert!(matches!(queue.enqueue(run.id), Err(RpcError::ServiceError(_))));
    }
}
