use crate::error::RpcResult;
use crate::handlers::{ProjectHandler, ReportHandler, RunHandler};
use crate::queue::RunQueue;

use scanflow_service::{EngineConfig, ProgressSender, RunController, StepRegistry, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Entry point of the command surface: one store, one controller, three handlers
pub struct RpcServer {
    config: EngineConfig,
    store: Arc<Store>,
    controller: Arc<RunController>,
    project_handler: ProjectHandler,
    run_handler: RunHandler,
    report_handler: ReportHandler,
}

impl RpcServer {
    /// Wire the built-in registry and the configured external services
    pub fn new(config: EngineConfig, store: Arc<Store>) -> RpcResult<Self> {
        Self::build(config, store, None)
    }

    /// Same as [`RpcServer::new`], forwarding execution events to `progress`
    pub fn with_progress(config: EngineConfig, store: Arc<Store>, progress: ProgressSender) -> RpcResult<Self> {
        Self::build(config, store, Some(progress))
    }

    fn build(config: EngineConfig, store: Arc<Store>, progress: Option<ProgressSender>) -> RpcResult<Self> {
        let registry = Arc::new(StepRegistry::builtin()?);
        let mut controller = RunController::new(store.clone(), registry)
            .with_services(config.services())
            .with_stop_dir(config.stop_dir());
        if let Some(tx) = progress {
            controller = controller.with_progress(tx);
        }
        let controller = Arc::new(controller);

        Ok(Self {
            project_handler: ProjectHandler::new(store.clone(), config.work_root.clone()),
            run_handler: RunHandler::new(controller.clone()),
            report_handler: ReportHandler::new(store.clone()),
            config,
            store,
            controller,
        })
    }

    /// Load the persisted store from the work root
    pub fn open(config: EngineConfig) -> RpcResult<Self> {
        let store = Arc::new(Store::load(&config.state_file())?);
        Self::new(config, store)
    }

    /// Load the persisted store and forward execution events to `progress`
    pub fn open_with_progress(config: EngineConfig, progress: ProgressSender) -> RpcResult<Self> {
        let store = Arc::new(Store::load(&config.state_file())?);
        Self::with_progress(config, store, progress)
    }

    /// Persist the store to the work root
    pub fn save(&self) -> RpcResult<PathBuf> {
        let path = self.config.state_file();
        self.store.save(&path)?;
        Ok(path)
    }

    /// Start a worker pool sized and timed from the configuration
    pub fn start_queue(&self) -> RunQueue {
        info!(workers = self.config.workers, "starting run queue");
        RunQueue::start(self.controller.clone(), self.config.workers, self.config.timeout())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn controller(&self) -> &Arc<RunController> {
        &self.controller
    }

    pub fn project_handler(&self) -> &ProjectHandler {
        &self.project_handler
    }

    pub fn run_handler(&self) -> &RunHandler {
        &self.run_handler
    }

    pub fn report_handler(&self) -> &ReportHandler {
        &self.report_handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanflow_service::models::{ProjectSettings, RunOptions, RunStatus};
    use std::fs;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> EngineConfig {
        EngineConfig {
            work_root: dir.path().to_path_buf(),
            workers: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scan_codebase_end_to_end() {
        let dir = TempDir::new().unwrap();
        let server = RpcServer::open(config(&dir)).unwrap();

        let input = dir.path().join("requirements.txt");
        fs::write(&input, "django==4.0.8\n").unwrap();
        server
            .project_handler()
            .create_project("e2e", ProjectSettings::default())
            .unwrap();
        server
            .project_handler()
            .add_input("e2e", input.to_str().unwrap())
            .unwrap();

        let run = server
            .run_handler()
            .create_run("e2e", "scan_codebase", RunOptions::default())
            .unwrap();
        let queue = server.start_queue();
        queue.enqueue(run.id).unwrap();
        let run = queue.wait_for(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded, "{:?}", run.log);
        queue.shutdown().await;

        let snapshot = server.store().snapshot(run.project).unwrap();
        assert!(snapshot.resources.iter().any(|r| r.path == "requirements.txt"));

        let path = server.save().unwrap();
        let reopened = RpcServer::open(config(&dir)).unwrap();
        assert!(path.is_file());
        assert_eq!(reopened.run_handler().list_runs("e2e").unwrap().len(), 1);
    }
}
