use crate::error::RpcResult;

use scanflow_service::{ReportAssembler, Store};
use std::path::PathBuf;
use std::sync::Arc;

/// Report rendering on demand
pub struct ReportHandler {
    store: Arc<Store>,
    assembler: ReportAssembler,
}

impl ReportHandler {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_assembler(store, ReportAssembler::new())
    }

    pub fn with_assembler(store: Arc<Store>, assembler: ReportAssembler) -> Self {
        Self { store, assembler }
    }

    pub fn formats(&self) -> Vec<&'static str> {
        self.assembler.formats()
    }

    /// Encode a project's current state without writing it anywhere
    pub fn render(&self, project: &str, format: &str) -> RpcResult<Vec<u8>> {
        let project = self.store.find_project(project)?;
        Ok(self.assembler.render(&self.store, project.id, format)?)
    }

    /// Encode a project and store the report in its output directory
    pub fn write_report(&self, project: &str, format: &str) -> RpcResult<PathBuf> {
        let project = self.store.find_project(project)?;
        Ok(self.assembler.write_report(&self.store, project.id, format)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use scanflow_service::models::{NewResource, Project};
    use tempfile::TempDir;

    #[test]
    fn test_render_and_write() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new());
        let project = store.create_project(Project::new("reports", dir.path())).unwrap();
        project.setup_work_directory().unwrap();
        store
            .scope(project.id)
            .unwrap()
            .add_resources(vec![NewResource::file("a.txt").with_size(3)])
            .unwrap();

        let handler = ReportHandler::new(store);
        let csv = String::from_utf8(handler.render("reports", "csv").unwrap()).unwrap();
        assert!(csv.contains("a.txt,file,a.txt,.txt,3,"));

        let path = handler.write_report("reports", "summary").unwrap();
        assert!(path.to_string_lossy().ends_with(".txt"));
        assert!(path.is_file());

        assert!(matches!(handler.render("reports", "xlsx"), Err(RpcError::InvalidRequest(_))));
        assert!(matches!(handler.render("other", "json"), Err(RpcError::NotFound(_))));
    }
}
