use scanflow_service::{
    Project, ReportAssembler, RunController, RunOptions, RunStatus, StepRegistry, StepStatus, Store,
};

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const CARGO_MANIFEST: &str = r#"
[package]
name = "demo"
version = "0.1.0"
license = "MIT"

[dependencies]
log = "0.4"
"#;

fn controller(store: &Arc<Store>) -> RunController {
    let registry = Arc::new(StepRegistry::builtin().unwrap());
    RunController::new(store.clone(), registry)
}

fn project_with_input(store: &Store, root: &Path, name: &str, input: &Path) -> Project {
    let mut project = Project::new(name, root);
    project.setup_work_directory().unwrap();
    project.copy_input_from(input, None).unwrap();
    store.create_project(project).unwrap()
}

#[tokio::test]
async fn test_cyclonedx_output_loads_into_another_project() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::new());
    let controller = controller(&store);

    let manifest = dir.path().join("Cargo.toml");
    fs::write(&manifest, CARGO_MANIFEST).unwrap();
    let scanned = project_with_input(&store, dir.path(), "scanned", &manifest);

    let run = controller
        .create_run(scanned.id, "scan_codebase", RunOptions::default())
        .unwrap();
    let run = controller.execute(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded, "{:?}", run.log);
    assert!(run.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(store
        .scope(scanned.id)
        .unwrap()
        .package_by_purl("pkg:cargo/demo@0.1.0")
        .is_some());

    let report = ReportAssembler::new()
        .write_report(&store, scanned.id, "cyclonedx")
        .unwrap();
    assert!(report.starts_with(scanned.output_path()));

    let loaded = project_with_input(&store, dir.path(), "loaded", &report);
    let run = controller
        .create_run(loaded.id, "load_sbom", RunOptions::default())
        .unwrap();
    let run = controller.execute(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded, "{:?}", run.log);

    let package = store
        .scope(loaded.id)
        .unwrap()
        .package_by_purl("pkg:cargo/demo@0.1.0")
        .unwrap();
    assert_eq!(package.declared_license_expression.as_deref(), Some("mit"));
}

#[tokio::test]
async fn test_saved_store_keeps_runs_and_graph() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::new());
    let controller = controller(&store);

    let manifest = dir.path().join("Cargo.toml");
    fs::write(&manifest, CARGO_MANIFEST).unwrap();
    let project = project_with_input(&store, dir.path(), "persisted", &manifest);
    let run = controller
        .create_run(project.id, "scan_codebase", RunOptions::default())
        .unwrap();
    controller.execute(run.id).await.unwrap();

    let state = dir.path().join("state.json");
    store.save(&state).unwrap();
    let reloaded = Store::load(&state).unwrap();

    let run = reloaded.run(run.id).unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(reloaded.project_by_name("persisted").unwrap().id, project.id);
    let scope = reloaded.scope(project.id).unwrap();
    assert!(scope.has_resource("Cargo.toml"));
    assert!(scope.package_by_purl("pkg:cargo/demo@0.1.0").is_some());
}
