// Test Harness
// Temporary project, store and run for exercising steps in unit tests

use crate::execution::context::StepContext;
use crate::models::{InputSource, Project, ProjectId, Run, RunId, RunOptions};
use crate::steps::ExternalServices;
use crate::store::{ProjectScope, Store};

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) struct TestHarness {
    pub dir: TempDir,
    pub store: Arc<Store>,
    pub project_id: ProjectId,
    pub run_id: RunId,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("test", dir.path());
        project.setup_work_directory().unwrap();

        let store = Arc::new(Store::new());
        let project = store.create_project(project).unwrap();
        let run = Run::new(project.id, "test", Vec::new(), RunOptions::default());
        let run_id = run.id;
        store.insert_run(run).unwrap();

        Self {
            dir,
            store,
            project_id: project.id,
            run_id,
        }
    }

    pub fn project(&self) -> Project {
        self.store.project(self.project_id).unwrap()
    }

    pub fn update_project(&self, f: impl FnOnce(&mut Project)) {
        let mut project = self.project();
        f(&mut project);
        self.store.update_project(project).unwrap();
    }

    /// Write a file to input/ and register it as an uploaded input
    pub fn add_input(&self, name: &str, content: &[u8], tag: Option<&str>) {
        let project = self.project();
        fs::create_dir_all(project.input_path()).unwrap();
        fs::write(project.input_path().join(name), content).unwrap();
        self.update_project(|p| {
            p.add_input_source(InputSource::uploaded(name, tag.map(str::to_string)))
        });
    }

    pub fn write_codebase(&self, path: &str, content: &[u8]) {
        let location = self.project().codebase_path().join(path);
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(location, content).unwrap();
    }

    pub fn run(&self) -> Run {
        self.store.run(self.run_id).unwrap()
    }

    pub fn scope(&self) -> ProjectScope {
        self.store.scope(self.project_id).unwrap()
    }

    pub fn context(&self, step: &str) -> StepContext {
        self.context_with(step, ExternalServices::default())
    }

    pub fn context_with(&self, step: &str, services: ExternalServices) -> StepContext {
        StepContext::new(
            self.project(),
            self.run_id,
            "test".to_string(),
            step.to_string(),
            self.store.clone(),
            services,
            None,
        )
        .unwrap()
    }
}
