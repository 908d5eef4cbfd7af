use crate::error::{RpcError, RpcResult};

use scanflow_service::models::{InputSource, Project, ProjectSettings};
use scanflow_service::Store;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Project lifecycle: creation, inputs and deletion
pub struct ProjectHandler {
    store: Arc<Store>,
    work_root: PathBuf,
}

impl ProjectHandler {
    pub fn new(store: Arc<Store>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_root: work_root.into(),
        }
    }

    /// Create a project and its work directory
    pub fn create_project(&self, name: &str, settings: ProjectSettings) -> RpcResult<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RpcError::InvalidRequest("project name cannot be empty".to_string()));
        }

        let project = Project::new(name, &self.work_root).with_settings(settings);
        let project = self.store.create_project(project)?;
        project.setup_work_directory()?;
        info!(project = %project.name, dir = %project.work_directory.display(), "project created");
        Ok(project)
    }

    pub fn get_project(&self, name_or_id: &str) -> RpcResult<Project> {
        Ok(self.store.find_project(name_or_id)?)
    }

    pub fn list_projects(&self) -> Vec<Project> {
        let mut projects = self.store.projects();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        projects
    }

    /// Copy a local file into the project's input directory
    pub fn add_input_file(&self, project: &str, location: &Path, tag: Option<String>) -> RpcResult<InputSource> {
        if !location.is_file() {
            return Err(RpcError::InvalidRequest(format!(
                "{} is not a file",
                location.display()
            )));
        }
        let mut project = self.get_project(project)?;
        let source = project.copy_input_from(location, tag)?;
        self.store.update_project(project)?;
        Ok(source)
    }

    /// Register a URL input, fetched by the first step of the next run
    pub fn add_input_url(&self, project: &str, url: &str, tag: Option<String>) -> RpcResult<InputSource> {
        let mut project = self.get_project(project)?;
        let source = InputSource::from_url(url, tag);
        project.add_input_source(source.clone());
        self.store.update_project(project)?;
        Ok(source)
    }

    /// `value` is a path or a URL, optionally suffixed with `#tag` (or `:tag` for files)
    pub fn add_input(&self, project: &str, value: &str) -> RpcResult<InputSource> {
        if value.contains("://") {
            let (url, tag) = InputSource::split_url_tag(value);
            self.add_input_url(project, url, tag)
        } else {
            let (path, tag) = InputSource::split_file_tag(value);
            self.add_input_file(project, Path::new(path), tag)
        }
    }

    /// Delete a project, its runs and its graph; optionally its work directory too
    pub fn delete_project(&self, name_or_id: &str, remove_files: bool) -> RpcResult<Project> {
        let project = self.get_project(name_or_id)?;
        let project = self.store.delete_project(project.id)?;
        if remove_files && project.work_directory.exists() {
            fs::remove_dir_all(&project.work_directory)?;
        }
        info!(project = %project.name, "project deleted");
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handler(dir: &TempDir) -> ProjectHandler {
        ProjectHandler::new(Arc::new(Store::new()), dir.path())
    }

    #[test]
    fn test_create_and_find_project() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        let project = handler
            .create_project("Demo App", ProjectSettings::default())
            .unwrap();
        assert!(project.input_path().is_dir());
        assert!(project.codebase_path().is_dir());
        assert_eq!(handler.get_project("Demo App").unwrap().id, project.id);
        assert_eq!(handler.get_project(&project.id.to_string()).unwrap().name, "Demo App");

        assert!(matches!(
            handler.create_project("Demo App", ProjectSettings::default()),
            Err(RpcError::ServiceError(_))
        ));
        assert!(matches!(
            handler.create_project("  ", ProjectSettings::default()),
            Err(RpcError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_add_inputs() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        handler.create_project("inputs", ProjectSettings::default()).unwrap();

        let file = dir.path().join("app.tar");
        fs::write(&file, b"data").unwrap();
        let source = handler
            .add_input_file("inputs", &file, Some("from".to_string()))
            .unwrap();
        assert!(source.is_uploaded);

        handler
            .add_input("inputs", "https://example.com/pkg.zip#to")
            .unwrap();

        let project = handler.get_project("inputs").unwrap();
        assert_eq!(project.input_sources.len(), 2);
        assert!(project.input_exists(&project.input_sources[0]));
        assert_eq!(project.inputs_with_tag("to").count(), 1);

        assert!(handler
            .add_input_file("inputs", &dir.path().join("missing"), None)
            .is_err());
    }

    #[test]
    fn test_delete_project_removes_files() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let project = handler.create_project("gone", ProjectSettings::default()).unwrap();

        handler.delete_project("gone", true).unwrap();
        assert!(!project.work_directory.exists());
        assert!(matches!(handler.get_project("gone"), Err(RpcError::NotFound(_))));
    }
}
