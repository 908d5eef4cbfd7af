// Dependency Model
// Declared dependencies of discovered packages or datafiles

use crate::models::project::ProjectId;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dependency data as produced by a manifest parser or SBOM loader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyData {
    pub purl: String,
    pub extracted_requirement: Option<String>,
    pub scope: Option<String>,
    pub is_runtime: bool,
    pub is_optional: bool,
    pub is_resolved: bool,
    pub datafile_path: Option<String>,
    pub datasource_id: Option<String>,
}

impl DependencyData {
    pub fn new(purl: impl Into<String>) -> Self {
        Self {
            purl: purl.into(),
            is_runtime: true,
            ..Default::default()
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.extracted_requirement = Some(requirement.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn in_datafile(mut self, path: impl Into<String>) -> Self {
        self.datafile_path = Some(path.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self.is_runtime = false;
        self
    }
}

/// A dependency recorded in a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDependency {
    /// Deterministic identifier; re-adding the same dependency updates it
    pub dependency_uid: String,
    pub project: ProjectId,
    pub for_package: Option<Uuid>,
    pub purl: String,
    pub extracted_requirement: Option<String>,
    pub scope: Option<String>,
    pub is_runtime: bool,
    pub is_optional: bool,
    pub is_resolved: bool,
    /// Package this dependency was resolved to, if any
    pub resolved_to: Option<Uuid>,
    pub datafile_path: Option<String>,
    pub datasource_id: Option<String>,
}

impl DiscoveredDependency {
    pub fn uid_for(data: &DependencyData, for_package: Option<Uuid>) -> String {
        format!(
            "{}|{}|{}",
            data.purl,
            for_package.map(|u| u.to_string()).unwrap_or_default(),
            data.datafile_path.as_deref().unwrap_or_default()
        )
    }

    pub fn from_data(project: ProjectId, data: &DependencyData, for_package: Option<Uuid>) -> Self {
        Self {
            dependency_uid: Self::uid_for(data, for_package),
            project,
            for_package,
            purl: data.purl.clone(),
            extracted_requirement: data.extracted_requirement.clone(),
            scope: data.scope.clone(),
            is_runtime: data.is_runtime,
            is_optional: data.is_optional,
            is_resolved: data.is_resolved,
            resolved_to: None,
            datafile_path: data.datafile_path.clone(),
            datasource_id: data.datasource_id.clone(),
        }
    }

    /// Mark as resolved to a package of the same project
    pub fn resolve_to(&mut self, package: Uuid) {
        self.resolved_to = Some(package);
        self.is_resolved = true;
    }
}
