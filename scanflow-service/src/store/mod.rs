// Resource Graph Store
// Projects, runs and per-project resource graphs, with JSON persistence

pub mod graph;
pub mod query;
pub mod scope;
pub mod snapshot;
pub mod summary;

pub use query::{ResourceFilter, ResourcePage, ResourceQuery, StatusFilter, DEFAULT_PAGE_SIZE};
pub use scope::{ProjectScope, StoreResult};
pub use snapshot::{ProjectSnapshot, ResourcePackage};
pub use summary::{DependencySummary, ObjectCounts, NO_LICENSE, NO_STATUS};

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Project, ProjectId, Run, RunId};
use graph::ResourceGraph;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// On-disk layout of the store
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    projects: Vec<ProjectSnapshot>,
}

/// Shared store for projects, runs and resource graphs
#[derive(Debug, Default)]
pub struct Store {
    projects: RwLock<HashMap<ProjectId, Project>>,
    runs: RwLock<HashMap<RunId, Run>>,
    graphs: RwLock<HashMap<ProjectId, Arc<ResourceGraph>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Projects
    // =========================================================================

    /// Register a project; names are unique
    pub fn create_project(&self, project: Project) -> ServiceResult<Project> {
        let mut projects = write(&self.projects);
        if projects.values().any(|p| p.name == project.name) {
            return Err(ServiceError::DuplicateProject(project.name));
        }
        projects.insert(project.id, project.clone());
        drop(projects);

        write(&self.graphs).insert(project.id, Arc::new(ResourceGraph::new(project.id)));
        debug!(project = %project.name, "project created");
        Ok(project)
    }

    pub fn project(&self, id: ProjectId) -> ServiceResult<Project> {
        read(&self.projects)
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::ProjectNotFound(id.to_string()))
    }

    pub fn project_by_name(&self, name: &str) -> ServiceResult<Project> {
        read(&self.projects)
            .values()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| ServiceError::ProjectNotFound(name.to_string()))
    }

    /// Look a project up by name, falling back to its id
    pub fn find_project(&self, name_or_id: &str) -> ServiceResult<Project> {
        match self.project_by_name(name_or_id) {
            Ok(project) => Ok(project),
            Err(err) => match Uuid::parse_str(name_or_id) {
                Ok(id) => self.project(id),
                Err(_) => Err(err),
            },
        }
    }

    /// All projects, oldest first
    pub fn projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = read(&self.projects).values().cloned().collect();
        projects.sort_by_key(|p| p.created_at);
        projects
    }

    pub fn update_project(&self, project: Project) -> ServiceResult<()> {
        let mut projects = write(&self.projects);
        if projects
            .values()
            .any(|p| p.name == project.name && p.id != project.id)
        {
            return Err(ServiceError::DuplicateProject(project.name));
        }
        match projects.get_mut(&project.id) {
            Some(slot) => {
                *slot = project;
                Ok(())
            }
            None => Err(ServiceError::ProjectNotFound(project.id.to_string())),
        }
    }

    /// Remove a project together with its runs and resource graph
    pub fn delete_project(&self, id: ProjectId) -> ServiceResult<Project> {
        let project = write(&self.projects)
            .remove(&id)
            .ok_or_else(|| ServiceError::ProjectNotFound(id.to_string()))?;
        write(&self.runs).retain(|_, run| run.project != id);
        write(&self.graphs).remove(&id);
        debug!(project = %project.name, "project deleted");
        Ok(project)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    pub fn insert_run(&self, run: Run) -> ServiceResult<()> {
        if !read(&self.projects).contains_key(&run.project) {
            return Err(ServiceError::ProjectNotFound(run.project.to_string()));
        }
        write(&self.runs).insert(run.id, run);
        Ok(())
    }

    pub fn run(&self, id: RunId) -> ServiceResult<Run> {
        read(&self.runs)
            .get(&id)
            .cloned()
            .ok_or(ServiceError::RunNotFound(id))
    }

    /// Runs of one project, oldest first
    pub fn runs_for_project(&self, project: ProjectId) -> Vec<Run> {
        let mut runs: Vec<Run> = read(&self.runs)
            .values()
            .filter(|r| r.project == project)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    /// Apply a change to a run; the stored record is only replaced when `f` succeeds
    pub fn modify_run<T, F>(&self, id: RunId, f: F) -> ServiceResult<T>
    where
        F: FnOnce(&mut Run) -> ServiceResult<T>,
    {
        let mut runs = write(&self.runs);
        let stored = runs.get_mut(&id).ok_or(ServiceError::RunNotFound(id))?;
        let mut draft = stored.clone();
        let value = f(&mut draft)?;
        *stored = draft;
        Ok(value)
    }

    // =========================================================================
    // Resource graphs
    // =========================================================================

    /// Handle bound to one project's resource graph
    pub fn scope(&self, project: ProjectId) -> ServiceResult<ProjectScope> {
        read(&self.graphs)
            .get(&project)
            .cloned()
            .map(ProjectScope::new)
            .ok_or_else(|| ServiceError::ProjectNotFound(project.to_string()))
    }

    /// Read-only copy of a project, its runs and its graph
    pub fn snapshot(&self, project: ProjectId) -> ServiceResult<ProjectSnapshot> {
        let record = self.project(project)?;
        let graph = read(&self.graphs)
            .get(&project)
            .cloned()
            .ok_or_else(|| ServiceError::ProjectNotFound(project.to_string()))?;

        Ok(ProjectSnapshot {
            project: record,
            runs: self.runs_for_project(project),
            resources: graph.resource_rows(),
            packages: graph.package_rows(),
            associations: graph.association_rows(),
            dependencies: graph.dependency_rows(),
            relations: graph.relation_rows(),
            messages: graph.message_rows(),
        })
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the whole store as JSON, atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> ServiceResult<()> {
        let mut state = StoreState::default();
        for project in self.projects() {
            state.projects.push(self.snapshot(project.id)?);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&state)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), projects = state.projects.len(), "store saved");
        Ok(())
    }

    /// Load a store written by [`Store::save`]; a missing file yields an empty store
    pub fn load(path: &Path) -> ServiceResult<Self> {
        let store = Self::new();
        if !path.exists() {
            return Ok(store);
        }

        let state: StoreState = serde_json::from_slice(&fs::read(path)?)?;
        {
            let mut projects = write(&store.projects);
            let mut runs = write(&store.runs);
            let mut graphs = write(&store.graphs);

            for snapshot in state.projects {
                let id = snapshot.project.id;
                for run in snapshot.runs {
                    runs.insert(run.id, run);
                }
                graphs.insert(
                    id,
                    Arc::new(ResourceGraph::from_rows(
                        id,
                        snapshot.resources,
                        snapshot.packages,
                        snapshot.associations,
                        snapshot.dependencies,
                        snapshot.relations,
                        snapshot.messages,
                    )),
                );
                projects.insert(id, snapshot.project);
            }
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{
        status, DependencyData, NewResource, PackageData, ProjectMessage, ResourceType, RunOptions,
        VulnerabilityRef,
    };

    fn make_store() -> (Store, Project) {
        let store = Store::new();
        let project = store
            .create_project(Project::new("test", Path::new("/tmp/scanflow-test")))
            .unwrap();
        (store, project)
    }

    #[test]
    fn test_duplicate_project_name() {
        let (store, _) = make_store();
        let err = store
            .create_project(Project::new("test", Path::new("/tmp")))
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateProject(_)));
    }

    #[test]
    fn test_add_resources_is_all_or_nothing() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();

        scope.add_resources(vec![NewResource::file("a.txt")]).unwrap();
        let err = scope
            .add_resources(vec![NewResource::file("b.txt"), NewResource::file("a.txt")])
            .unwrap_err();
        assert!(err.is_duplicate_path());
        assert!(!scope.has_resource("b.txt"));

        let err = scope
            .add_resources(vec![NewResource::file("c.txt"), NewResource::file("c.txt")])
            .unwrap_err();
        assert!(err.is_duplicate_path());
        assert_eq!(scope.resource_count(), 1);
    }

    #[test]
    fn test_concurrent_insert_of_same_path() {
        let (store, project) = make_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scope = store.scope(project.id).unwrap();
                std::thread::spawn(move || scope.add_resources(vec![NewResource::file("/bin/ls")]))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::DuplicatePath { .. })))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(losers, 7);
        assert_eq!(store.scope(project.id).unwrap().resource_count(), 1);
    }

    #[test]
    fn test_concurrent_package_writes_keep_both_fields() {
        let (store, project) = make_store();
        let store = Arc::new(store);
        let package = store
            .scope(project.id)
            .unwrap()
            .update_or_create_package(&PackageData::new("pypi", "django").with_version("4.0.8"))
            .unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let enrich = {
            let scope = store.scope(project.id).unwrap();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let stale = scope.packages().remove(0);
                barrier.wait();
                scope.modify_package(stale.uuid, |p| {
                    p.homepage_url = Some("https://www.djangoproject.com/".to_string())
                })
            })
        };
        let advisories = {
            let scope = store.scope(project.id).unwrap();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let stale = scope.packages().remove(0);
                barrier.wait();
                scope.modify_package(stale.uuid, |p| {
                    p.affected_by_vulnerabilities = vec![VulnerabilityRef {
                        vulnerability_id: "VCID-1".to_string(),
                        aliases: Vec::new(),
                        summary: String::new(),
                        severity: None,
                        fixed_version: None,
                    }]
                })
            })
        };
        enrich.join().unwrap().unwrap();
        advisories.join().unwrap().unwrap();

        let stored = store.scope(project.id).unwrap().package(package.uuid).unwrap();
        assert_eq!(stored.homepage_url.as_deref(), Some("https://www.djangoproject.com/"));
        assert_eq!(stored.affected_by_vulnerabilities.len(), 1);
    }

    #[test]
    fn test_modify_package_keeps_identity() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();
        let package = scope
            .update_or_create_package(&PackageData::new("npm", "lodash").with_version("4.17.21"))
            .unwrap();

        let err = scope
            .modify_package(package.uuid, |p| p.version = Some("5.0.0".to_string()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPackage(_)));
        assert_eq!(
            scope.package(package.uuid).unwrap().version.as_deref(),
            Some("4.17.21")
        );
        assert!(matches!(
            scope.modify_dependency("missing", |_| ()),
            Err(StoreError::DependencyNotFound(_))
        ));
    }

    #[test]
    fn test_attach_package_is_idempotent() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();
        let resource = scope.add_resource(NewResource::file("lib/x.jar")).unwrap();
        let package = scope
            .update_or_create_package(&PackageData::new("maven", "x").with_version("1.0"))
            .unwrap();

        assert!(scope.attach_package(&resource.key(), &package).unwrap());
        assert!(!scope.attach_package(&resource.key(), &package).unwrap());

        let snapshot = store.snapshot(project.id).unwrap();
        assert_eq!(snapshot.associations.len(), 1);
        assert_eq!(scope.resource_packages("lib/x.jar").len(), 1);
        assert_eq!(scope.package_resources(package.uuid).len(), 1);
    }

    #[test]
    fn test_scope_isolation() {
        let (store, project) = make_store();
        let other = store
            .create_project(Project::new("other", Path::new("/tmp")))
            .unwrap();

        let mine = store.scope(project.id).unwrap();
        let theirs = store.scope(other.id).unwrap();
        let resource = theirs.add_resource(NewResource::file("secret.txt")).unwrap();
        let package = theirs
            .update_or_create_package(&PackageData::new("npm", "left-pad"))
            .unwrap();

        assert!(matches!(
            mine.resource(&resource.key()),
            Err(StoreError::ScopeViolation { .. })
        ));
        assert!(matches!(
            mine.update_resource(resource.clone()),
            Err(StoreError::ScopeViolation { .. })
        ));
        assert!(matches!(
            mine.attach_package(&resource.key(), &package),
            Err(StoreError::ScopeViolation { .. })
        ));
        assert!(matches!(
            mine.add_message(ProjectMessage::error(other.id, "step", "nope")),
            Err(StoreError::ScopeViolation { .. })
        ));
        assert!(mine.messages().is_empty());
        assert!(theirs.messages().is_empty());
    }

    #[test]
    fn test_update_or_create_package_keyed_by_purl() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();

        let first = scope
            .update_or_create_package(&PackageData::new("pypi", "toml").with_version("0.10.2"))
            .unwrap();
        let mut richer = PackageData::new("pypi", "toml").with_version("0.10.2");
        richer.declared_license_expression = Some("mit".to_string());
        let second = scope.update_or_create_package(&richer).unwrap();

        assert_eq!(first.uuid, second.uuid);
        assert_eq!(second.declared_license_expression.as_deref(), Some("mit"));
        assert_eq!(scope.packages().len(), 1);

        let err = scope
            .update_or_create_package(&PackageData::new("", "nameless"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPackage(_)));
    }

    #[test]
    fn test_add_dependency_upserts() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();
        let package = scope
            .update_or_create_package(&PackageData::new("npm", "app"))
            .unwrap();

        let data = DependencyData::new("pkg:npm/lodash").with_requirement("^4.0.0");
        scope.add_dependency(&data, Some(package.uuid)).unwrap();
        scope
            .add_dependency(&data.clone().with_scope("dependencies"), Some(package.uuid))
            .unwrap();

        let deps = scope.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].scope.as_deref(), Some("dependencies"));

        let err = scope.add_dependency(&data, Some(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, StoreError::PackageNotFound(_)));
    }

    #[test]
    fn test_query_filters_and_pagination() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();
        let mut batch = vec![NewResource::directory("usr"), NewResource::directory("usr/lib")];
        for i in 0..25 {
            batch.push(NewResource::file(format!("usr/lib/lib{:02}.so", i)));
        }
        batch.push(NewResource::file("usr/library.txt"));
        batch.push(NewResource::file("etc/os-release"));
        scope.add_resources(batch).unwrap();
        scope.set_status("etc/os-release", status::SCANNED).unwrap();

        let query = scope
            .query_resources(ResourceFilter::files().under("usr/lib"))
            .page_size(10);
        let pages: Vec<_> = query.pages().collect();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].items.len(), 10);
        assert_eq!(pages[2].items.len(), 5);
        assert!(pages[2].next_cursor.is_none());
        assert_eq!(query.count(), 25);

        // restart from a cursor
        let cursor = pages[0].next_cursor.clone().unwrap();
        let resumed = query.page(Some(&cursor));
        assert_eq!(resumed.items[0].path, pages[1].items[0].path);

        let unset = scope.query_resources(ResourceFilter::files().without_status());
        assert_eq!(unset.count(), 26);
        let scanned = scope.query_resources(ResourceFilter::new().with_status(status::SCANNED));
        assert_eq!(scanned.paths(), vec!["etc/os-release".to_string()]);

        let dirs = scope.query_resources(ResourceFilter::new().of_type(ResourceType::Directory));
        assert_eq!(dirs.count(), 2);

        let so = scope.query_resources(ResourceFilter::new().with_extension(".so"));
        assert_eq!(so.count(), 25);
    }

    #[test]
    fn test_query_in_package() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();
        scope
            .add_resources(vec![NewResource::file("a"), NewResource::file("b")])
            .unwrap();
        let package = scope
            .update_or_create_package(&PackageData::new("generic", "a"))
            .unwrap();
        scope.attach_package(&scope.key("a"), &package).unwrap();

        let inside = scope.query_resources(ResourceFilter::new().in_package(true));
        let outside = scope.query_resources(ResourceFilter::new().in_package(false));
        assert_eq!(inside.paths(), vec!["a".to_string()]);
        assert_eq!(outside.paths(), vec!["b".to_string()]);
    }

    #[test]
    fn test_modify_run_is_atomic() {
        let (store, project) = make_store();
        let run = Run::new(project.id, "scan_codebase", Vec::new(), RunOptions::default());
        let id = run.id;
        store.insert_run(run).unwrap();

        let err = store
            .modify_run(id, |run| {
                run.append_to_log("should not persist");
                run.transition(crate::models::RunStatus::Succeeded)
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));
        assert!(store.run(id).unwrap().log.is_empty());
    }

    #[test]
    fn test_delete_project_cascades() {
        let (store, project) = make_store();
        store
            .insert_run(Run::new(project.id, "docker", Vec::new(), RunOptions::default()))
            .unwrap();
        store.delete_project(project.id).unwrap();

        assert!(store.runs_for_project(project.id).is_empty());
        assert!(store.scope(project.id).is_err());
        assert!(store.projects().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();
        let resource = scope.add_resource(NewResource::file("a.py")).unwrap();
        let package = scope
            .update_or_create_package(&PackageData::new("pypi", "a"))
            .unwrap();
        scope.attach_package(&resource.key(), &package).unwrap();
        store
            .insert_run(Run::new(project.id, "scan_codebase", Vec::new(), RunOptions::default()))
            .unwrap();
        store.save(&path).unwrap();

        let loaded = Store::load(&path).unwrap();
        let snapshot = loaded.snapshot(project.id).unwrap();
        assert_eq!(snapshot.project.name, "test");
        assert_eq!(snapshot.runs.len(), 1);
        assert_eq!(snapshot.resources.len(), 1);
        assert_eq!(snapshot.associations.len(), 1);

        let scope = loaded.scope(project.id).unwrap();
        assert!(scope.package_by_purl("pkg:pypi/a").is_some());
        assert!(Store::load(&dir.path().join("missing.json")).unwrap().projects().is_empty());
    }

    #[test]
    fn test_status_counts() {
        let (store, project) = make_store();
        let scope = store.scope(project.id).unwrap();
        scope
            .add_resources(vec![NewResource::file("a"), NewResource::file("b")])
            .unwrap();
        scope.set_status("a", status::SCANNED).unwrap();

        let counts = store.snapshot(project.id).unwrap().status_counts();
        assert_eq!(counts.get(status::SCANNED), Some(&1));
        assert_eq!(counts.get(NO_STATUS), Some(&1));
    }
}
