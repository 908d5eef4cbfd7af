// Codebase Relation Model
// Mapping between two resources of the same project (deploy-to-develop)

use crate::models::project::ProjectId;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodebaseRelation {
    pub project: ProjectId,
    pub from_path: String,
    pub to_path: String,
    /// How the mapping was established, e.g. "sha256" or "java_to_class"
    pub map_type: String,
}

impl CodebaseRelation {
    pub fn new(
        project: ProjectId,
        from_path: impl Into<String>,
        to_path: impl Into<String>,
        map_type: impl Into<String>,
    ) -> Self {
        Self {
            project,
            from_path: from_path.into(),
            to_path: to_path.into(),
            map_type: map_type.into(),
        }
    }
}
