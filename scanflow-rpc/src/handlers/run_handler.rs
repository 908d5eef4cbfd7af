use crate::error::{RpcError, RpcResult};
use crate::handlers::parse_id;

use scanflow_service::models::{Run, RunOptions};
use scanflow_service::{PipelineInfo, RunController};
use std::sync::Arc;

/// Pipelines and runs: creation, inline execution, stop and resume
pub struct RunHandler {
    controller: Arc<RunController>,
}

impl RunHandler {
    pub fn new(controller: Arc<RunController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }

    pub fn list_pipelines(&self) -> RpcResult<Vec<PipelineInfo>> {
        let registry = self.controller.registry();
        registry
            .names()
            .into_iter()
            .map(|name| registry.info(name).map_err(RpcError::from))
            .collect()
    }

    /// Create a run; `pipeline` accepts the `name:group1,group2` syntax
    pub fn create_run(&self, project: &str, pipeline: &str, options: RunOptions) -> RpcResult<Run> {
        let project = self.controller.store().find_project(project)?;
        Ok(self.controller.create_run(project.id, pipeline, options)?)
    }

    /// Execute a run in the calling task and return its final record
    pub async fn execute_run(&self, run: &str) -> RpcResult<Run> {
        let run_id = parse_id(run)?;
        Ok(self.controller.execute(run_id).await?)
    }

    pub fn get_run(&self, run: &str) -> RpcResult<Run> {
        Ok(self.controller.store().run(parse_id(run)?)?)
    }

    /// Runs of a project, oldest first
    pub fn list_runs(&self, project: &str) -> RpcResult<Vec<Run>> {
        let project = self.controller.store().find_project(project)?;
        let mut runs = self.controller.store().runs_for_project(project.id);
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    pub fn stop_run(&self, run: &str) -> RpcResult<Run> {
        Ok(self.controller.stop(parse_id(run)?)?)
    }

    /// Create a new run continuing a failed or stopped one
    pub fn resume_run(&self, run: &str) -> RpcResult<Run> {
        Ok(self.controller.resume(parse_id(run)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanflow_service::models::{Project, RunStatus};
    use scanflow_service::registry::{PipelineDefinition, StepDescriptor};
    use scanflow_service::{StepError, StepRegistry, Store};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    static FAIL: AtomicBool = AtomicBool::new(true);

    fn handler(dir: &TempDir) -> RunHandler {
        let store = Arc::new(Store::new());
        let project = store.create_project(Project::new("runs", dir.path())).unwrap();
        project.setup_work_directory().unwrap();

        let registry = StepRegistry::builder()
            .register(
                PipelineDefinition::new("flaky", "Fails once")
                    .without_download()
                    .step(StepDescriptor::from_fn("first", "Always works", |_ctx| Ok(())))
                    .step(StepDescriptor::from_fn("second", "Fails the first time", |_ctx| {
                        if FAIL.swap(false, Ordering::SeqCst) {
                            Err(StepError::analysis("not yet"))
                        } else {
                            Ok(())
                        }
                    })),
            )
            .unwrap()
            .build();
        RunHandler::new(Arc::new(RunController::new(store, Arc::new(registry))))
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        assert_eq!(handler.list_pipelines().unwrap()[0].name, "flaky");

        let run = handler.create_run("runs", "flaky", RunOptions::default()).unwrap();
        let failed = handler.execute_run(&run.id.to_string()).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);

        let resumed = handler.resume_run(&run.id.to_string()).unwrap();
        assert_eq!(resumed.resumed_from, Some(run.id));
        let done = handler.execute_run(&resumed.id.to_string()).await.unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);

        let runs = handler.list_runs("runs").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, run.id);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        assert!(matches!(handler.get_run("not-a-uuid"), Err(RpcError::InvalidRequest(_))));
        assert!(matches!(
            handler.create_run("runs", "missing", RunOptions::default()),
            Err(RpcError::InvalidRequest(_))
        ));
        assert!(matches!(
            handler.create_run("nobody", "flaky", RunOptions::default()),
            Err(RpcError::NotFound(_))
        ));

        let run = handler.create_run("runs", "flaky", RunOptions::default()).unwrap();
        let stopped = handler.stop_run(&run.id.to_string()).unwrap();
        assert_eq!(stopped.status, RunStatus::Stopped);
    }
}
