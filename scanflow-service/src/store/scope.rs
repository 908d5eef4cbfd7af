// Project Scope
// Store handle bound to one project; every access is checked against it

use crate::error::StoreError;
use crate::models::{
    CodebaseRelation, CodebaseResource, DependencyData, DiscoveredDependency, DiscoveredPackage,
    NewResource, PackageData, ProjectId, ProjectMessage, ResourceKey,
};
use crate::store::graph::ResourceGraph;
use crate::store::query::{ResourceFilter, ResourceQuery};
use crate::store::{read, write};

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle given to steps: reads and writes one project's resource graph
#[derive(Debug, Clone)]
pub struct ProjectScope {
    project: ProjectId,
    graph: Arc<ResourceGraph>,
}

impl ProjectScope {
    pub(crate) fn new(graph: Arc<ResourceGraph>) -> Self {
        Self {
            project: graph.project,
            graph,
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project
    }

    fn check(&self, project: ProjectId) -> StoreResult<()> {
        if project != self.project {
            return Err(StoreError::ScopeViolation {
                bound: self.project,
                requested: project,
            });
        }
        Ok(())
    }

    pub fn key(&self, path: &str) -> ResourceKey {
        ResourceKey {
            project: self.project,
            path: crate::models::normalize_path(path),
        }
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Insert a batch of resources; either all are inserted or none
    pub fn add_resources(&self, batch: Vec<NewResource>) -> StoreResult<usize> {
        let mut table = write(&self.graph.resources);

        let mut seen = HashSet::with_capacity(batch.len());
        for new in &batch {
            if table.contains_key(&new.path) || !seen.insert(new.path.as_str()) {
                return Err(StoreError::DuplicatePath {
                    project: self.project,
                    path: new.path.clone(),
                });
            }
        }

        let count = batch.len();
        for new in batch {
            let resource = CodebaseResource::from_new(self.project, new);
            table.insert(resource.path.clone(), resource);
        }
        Ok(count)
    }

    pub fn add_resource(&self, new: NewResource) -> StoreResult<CodebaseResource> {
        let path = new.path.clone();
        self.add_resources(vec![new])?;
        self.resource_at(&path)
    }

    /// Return the resource at the new path, creating it if missing
    pub fn get_or_create_resource(&self, new: NewResource) -> (CodebaseResource, bool) {
        let mut table = write(&self.graph.resources);
        if let Some(existing) = table.get(&new.path) {
            return (existing.clone(), false);
        }
        let resource = CodebaseResource::from_new(self.project, new);
        table.insert(resource.path.clone(), resource.clone());
        (resource, true)
    }

    pub fn resource(&self, key: &ResourceKey) -> StoreResult<CodebaseResource> {
        self.check(key.project)?;
        self.resource_at(&key.path)
    }

    pub fn resource_at(&self, path: &str) -> StoreResult<CodebaseResource> {
        let path = crate::models::normalize_path(path);
        read(&self.graph.resources)
            .get(&path)
            .cloned()
            .ok_or(StoreError::ResourceNotFound(path))
    }

    pub fn has_resource(&self, path: &str) -> bool {
        read(&self.graph.resources).contains_key(&crate::models::normalize_path(path))
    }

    /// Replace a stored resource; the path cannot change
    pub fn update_resource(&self, resource: CodebaseResource) -> StoreResult<()> {
        self.check(resource.project)?;
        let mut table = write(&self.graph.resources);
        match table.get_mut(&resource.path) {
            Some(slot) => {
                *slot = resource;
                Ok(())
            }
            None => Err(StoreError::ResourceNotFound(resource.path)),
        }
    }

    /// Mutate a stored resource in place
    pub fn modify_resource<F>(&self, path: &str, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut CodebaseResource),
    {
        let path = crate::models::normalize_path(path);
        let mut table = write(&self.graph.resources);
        let resource = table
            .get_mut(&path)
            .ok_or_else(|| StoreError::ResourceNotFound(path.clone()))?;
        f(resource);
        resource.path = path;
        resource.project = self.project;
        Ok(())
    }

    pub fn set_status(&self, path: &str, status: &str) -> StoreResult<()> {
        self.modify_resource(path, |r| r.status = Some(status.to_string()))
    }

    pub fn query_resources(&self, filter: ResourceFilter) -> ResourceQuery {
        ResourceQuery::new(self.graph.clone(), filter)
    }

    pub fn resource_count(&self) -> usize {
        read(&self.graph.resources).len()
    }

    // =========================================================================
    // Packages
    // =========================================================================

    /// Create a package keyed by its purl, or fill the missing fields of the existing one
    pub fn update_or_create_package(&self, data: &PackageData) -> StoreResult<DiscoveredPackage> {
        if data.name.trim().is_empty() || data.package_type.trim().is_empty() {
            return Err(StoreError::InvalidPackage(format!(
                "type and name are required (type='{}', name='{}')",
                data.package_type, data.name
            )));
        }

        let purl = data.purl().to_string();
        let mut table = write(&self.graph.packages);
        if let Some(uuid) = table.by_purl.get(&purl).copied() {
            if let Some(existing) = table.by_uuid.get_mut(&uuid) {
                existing.update_from(data);
                return Ok(existing.clone());
            }
        }

        let package = DiscoveredPackage::from_data(self.project, data);
        table.insert(package.clone());
        Ok(package)
    }

    pub fn package(&self, uuid: Uuid) -> StoreResult<DiscoveredPackage> {
        read(&self.graph.packages)
            .by_uuid
            .get(&uuid)
            .cloned()
            .ok_or(StoreError::PackageNotFound(uuid))
    }

    pub fn package_by_purl(&self, purl: &str) -> Option<DiscoveredPackage> {
        let table = read(&self.graph.packages);
        table
            .by_purl
            .get(purl)
            .and_then(|uuid| table.by_uuid.get(uuid))
            .cloned()
    }

    pub fn packages(&self) -> Vec<DiscoveredPackage> {
        read(&self.graph.packages).by_uuid.values().cloned().collect()
    }

    /// Mutate a stored package under the table write lock
    ///
    /// Concurrent writers each see the latest row. The package-url is part of
    /// the identity and cannot change; the row is left untouched if it would.
    pub fn modify_package<T, F>(&self, uuid: Uuid, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut DiscoveredPackage) -> T,
    {
        let mut table = write(&self.graph.packages);
        let slot = table
            .by_uuid
            .get_mut(&uuid)
            .ok_or(StoreError::PackageNotFound(uuid))?;

        let mut updated = slot.clone();
        let result = f(&mut updated);
        if updated.package_url() != slot.package_url() {
            return Err(StoreError::InvalidPackage(format!(
                "package-url of {} cannot change",
                uuid
            )));
        }
        updated.uuid = uuid;
        updated.project = self.project;
        *slot = updated;
        Ok(result)
    }

    /// Link a resource to a package; returns false if the link already existed
    pub fn attach_package(
        &self,
        resource: &ResourceKey,
        package: &DiscoveredPackage,
    ) -> StoreResult<bool> {
        self.check(resource.project)?;
        self.check(package.project)?;

        if !self.has_resource(&resource.path) {
            return Err(StoreError::ResourceNotFound(resource.path.clone()));
        }
        if !read(&self.graph.packages).by_uuid.contains_key(&package.uuid) {
            return Err(StoreError::PackageNotFound(package.uuid));
        }

        Ok(write(&self.graph.associations).insert((resource.path.clone(), package.uuid)))
    }

    pub fn package_resources(&self, package: Uuid) -> Vec<CodebaseResource> {
        let paths = ResourceQuery::paths_for_package(&self.graph, package);
        let table = read(&self.graph.resources);
        paths.iter().filter_map(|p| table.get(p).cloned()).collect()
    }

    pub fn resource_packages(&self, path: &str) -> Vec<DiscoveredPackage> {
        let path = crate::models::normalize_path(path);
        let uuids: Vec<Uuid> = read(&self.graph.associations)
            .iter()
            .filter(|(p, _)| *p == path)
            .map(|(_, uuid)| *uuid)
            .collect();
        let table = read(&self.graph.packages);
        uuids
            .iter()
            .filter_map(|uuid| table.by_uuid.get(uuid).cloned())
            .collect()
    }

    // =========================================================================
    // Dependencies, relations and messages
    // =========================================================================

    /// Record a dependency; re-adding the same one updates it in place
    pub fn add_dependency(
        &self,
        data: &DependencyData,
        for_package: Option<Uuid>,
    ) -> StoreResult<DiscoveredDependency> {
        if data.purl.trim().is_empty() {
            return Err(StoreError::InvalidPackage("dependency purl is empty".to_string()));
        }
        if let Some(uuid) = for_package {
            if !read(&self.graph.packages).by_uuid.contains_key(&uuid) {
                return Err(StoreError::PackageNotFound(uuid));
            }
        }

        let mut dependency = DiscoveredDependency::from_data(self.project, data, for_package);
        let mut table = write(&self.graph.dependencies);
        if let Some(existing) = table.get(&dependency.dependency_uid) {
            if dependency.resolved_to.is_none() {
                dependency.resolved_to = existing.resolved_to;
                dependency.is_resolved |= existing.is_resolved;
            }
        }
        table.insert(dependency.dependency_uid.clone(), dependency.clone());
        Ok(dependency)
    }

    pub fn dependencies(&self) -> Vec<DiscoveredDependency> {
        read(&self.graph.dependencies).values().cloned().collect()
    }

    /// Mutate a stored dependency under the table write lock
    pub fn modify_dependency<T, F>(&self, dependency_uid: &str, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut DiscoveredDependency) -> T,
    {
        let mut table = write(&self.graph.dependencies);
        let dependency = table
            .get_mut(dependency_uid)
            .ok_or_else(|| StoreError::DependencyNotFound(dependency_uid.to_string()))?;
        let result = f(dependency);
        dependency.dependency_uid = dependency_uid.to_string();
        dependency.project = self.project;
        Ok(result)
    }

    /// Record a relation between two resources; returns false if already present
    pub fn add_relation(&self, relation: CodebaseRelation) -> StoreResult<bool> {
        self.check(relation.project)?;
        for path in [&relation.from_path, &relation.to_path] {
            if !self.has_resource(path) {
                return Err(StoreError::ResourceNotFound(path.clone()));
            }
        }
        Ok(write(&self.graph.relations).insert(relation))
    }

    pub fn relations(&self) -> Vec<CodebaseRelation> {
        read(&self.graph.relations).iter().cloned().collect()
    }

    pub fn add_message(&self, message: ProjectMessage) -> StoreResult<()> {
        self.check(message.project)?;
        write(&self.graph.messages).push(message);
        Ok(())
    }

    pub fn messages(&self) -> Vec<ProjectMessage> {
        read(&self.graph.messages).clone()
    }
}
