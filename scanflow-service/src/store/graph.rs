// Resource Graph
// Per-project tables, each behind its own lock

use crate::models::{
    CodebaseRelation, CodebaseResource, DiscoveredDependency, DiscoveredPackage, ProjectId,
    ProjectMessage,
};
use crate::store::snapshot::ResourcePackage;
use crate::store::{read, write};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use uuid::Uuid;

/// Packages indexed by uuid, with a unique purl index
#[derive(Debug, Default)]
pub(crate) struct PackageTable {
    pub by_uuid: BTreeMap<Uuid, DiscoveredPackage>,
    pub by_purl: HashMap<String, Uuid>,
}

impl PackageTable {
    pub fn insert(&mut self, package: DiscoveredPackage) {
        self.by_purl.insert(package.package_url(), package.uuid);
        self.by_uuid.insert(package.uuid, package);
    }
}

/// The resource graph of one project
///
/// Every table has its own lock and no method holds two locks at once, so
/// writers on different tables never wait on each other and report snapshots
/// only take short read locks.
#[derive(Debug)]
pub(crate) struct ResourceGraph {
    pub project: ProjectId,
    pub resources: RwLock<BTreeMap<String, CodebaseResource>>,
    pub packages: RwLock<PackageTable>,
    /// (resource path, package uuid)
    pub associations: RwLock<BTreeSet<(String, Uuid)>>,
    pub dependencies: RwLock<BTreeMap<String, DiscoveredDependency>>,
    pub relations: RwLock<BTreeSet<CodebaseRelation>>,
    pub messages: RwLock<Vec<ProjectMessage>>,
}

impl ResourceGraph {
    pub fn new(project: ProjectId) -> Self {
        Self {
            project,
            resources: RwLock::new(BTreeMap::new()),
            packages: RwLock::new(PackageTable::default()),
            associations: RwLock::new(BTreeSet::new()),
            dependencies: RwLock::new(BTreeMap::new()),
            relations: RwLock::new(BTreeSet::new()),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild a graph from persisted rows
    pub fn from_rows(
        project: ProjectId,
        resources: Vec<CodebaseResource>,
        packages: Vec<DiscoveredPackage>,
        associations: Vec<ResourcePackage>,
        dependencies: Vec<DiscoveredDependency>,
        relations: Vec<CodebaseRelation>,
        messages: Vec<ProjectMessage>,
    ) -> Self {
        let graph = Self::new(project);
        {
            let mut table = write(&graph.resources);
            for resource in resources {
                table.insert(resource.path.clone(), resource);
            }
        }
        {
            let mut table = write(&graph.packages);
            for package in packages {
                table.insert(package);
            }
        }
        {
            let mut table = write(&graph.associations);
            table.extend(associations.into_iter().map(|a| (a.path, a.package)));
        }
        {
            let mut table = write(&graph.dependencies);
            for dependency in dependencies {
                table.insert(dependency.dependency_uid.clone(), dependency);
            }
        }
        write(&graph.relations).extend(relations);
        *write(&graph.messages) = messages;
        graph
    }

    pub fn resource_rows(&self) -> Vec<CodebaseResource> {
        read(&self.resources).values().cloned().collect()
    }

    pub fn package_rows(&self) -> Vec<DiscoveredPackage> {
        read(&self.packages).by_uuid.values().cloned().collect()
    }

    pub fn association_rows(&self) -> Vec<ResourcePackage> {
        read(&self.associations)
            .iter()
            .map(|(path, package)| ResourcePackage {
                path: path.clone(),
                package: *package,
            })
            .collect()
    }

    pub fn dependency_rows(&self) -> Vec<DiscoveredDependency> {
        read(&self.dependencies).values().cloned().collect()
    }

    pub fn relation_rows(&self) -> Vec<CodebaseRelation> {
        read(&self.relations).iter().cloned().collect()
    }

    pub fn message_rows(&self) -> Vec<ProjectMessage> {
        read(&self.messages).clone()
    }
}
