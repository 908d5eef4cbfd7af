// Project Snapshot
// Point-in-time copy of a project, its runs and its resource graph

use crate::models::{
    CodebaseRelation, CodebaseResource, DiscoveredDependency, DiscoveredPackage, Project,
    ProjectMessage, Run,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Many-to-many link between a resource and a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePackage {
    pub path: String,
    pub package: Uuid,
}

/// Read-only copy used by reports and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    #[serde(default)]
    pub runs: Vec<Run>,
    #[serde(default)]
    pub resources: Vec<CodebaseResource>,
    #[serde(default)]
    pub packages: Vec<DiscoveredPackage>,
    #[serde(default)]
    pub associations: Vec<ResourcePackage>,
    #[serde(default)]
    pub dependencies: Vec<DiscoveredDependency>,
    #[serde(default)]
    pub relations: Vec<CodebaseRelation>,
    #[serde(default)]
    pub messages: Vec<ProjectMessage>,
}

impl ProjectSnapshot {
    /// Packages attached to each resource path, built in one pass over the links
    pub fn packages_by_resource(&self) -> HashMap<&str, Vec<&DiscoveredPackage>> {
        let by_uuid: HashMap<Uuid, &DiscoveredPackage> =
            self.packages.iter().map(|p| (p.uuid, p)).collect();

        let mut index: HashMap<&str, Vec<&DiscoveredPackage>> = HashMap::new();
        for association in &self.associations {
            if let Some(package) = by_uuid.get(&association.package) {
                index
                    .entry(association.path.as_str())
                    .or_default()
                    .push(*package);
            }
        }
        index
    }

    /// Paths of the resources a package is attached to
    pub fn resource_paths_for_package(&self, package: Uuid) -> Vec<&str> {
        self.associations
            .iter()
            .filter(|a| a.package == package)
            .map(|a| a.path.as_str())
            .collect()
    }

    pub fn package(&self, uuid: Uuid) -> Option<&DiscoveredPackage> {
        self.packages.iter().find(|p| p.uuid == uuid)
    }

    /// Dependencies declared by a package (`None` = the project itself)
    pub fn dependencies_of(
        &self,
        package: Option<Uuid>,
    ) -> impl Iterator<Item = &DiscoveredDependency> + '_ {
        self.dependencies
            .iter()
            .filter(move |d| d.for_package == package)
    }

    pub fn latest_run(&self) -> Option<&Run> {
        self.runs.iter().max_by_key(|r| r.created_at)
    }
}

#[cfg(test)]
mod tests {
    use crate::execution::testing::TestHarness;
    use crate::models::{NewResource, PackageData};

    #[test]
    fn test_packages_by_resource() {
        let harness = TestHarness::new();
        let scope = harness.scope();
        scope
            .add_resources(vec![
                NewResource::file("lib/a.py"),
                NewResource::file("lib/b.py"),
                NewResource::file("README.md"),
            ])
            .unwrap();
        let flask = scope
            .update_or_create_package(&PackageData::new("pypi", "flask").with_version("2.0.0"))
            .unwrap();
        let click = scope
            .update_or_create_package(&PackageData::new("pypi", "click").with_version("8.0.0"))
            .unwrap();
        scope.attach_package(&scope.key("lib/a.py"), &flask).unwrap();
        scope.attach_package(&scope.key("lib/b.py"), &flask).unwrap();
        scope.attach_package(&scope.key("lib/b.py"), &click).unwrap();

        let snapshot = harness.store.snapshot(harness.project_id).unwrap();
        let index = snapshot.packages_by_resource();

        assert_eq!(index.len(), 2);
        assert_eq!(index["lib/a.py"].len(), 1);
        assert_eq!(index["lib/a.py"][0].uuid, flask.uuid);
        let mut names: Vec<&str> = index["lib/b.py"].iter().map(|p| p.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["click", "flask"]);
        assert!(!index.contains_key("README.md"));
    }
}
