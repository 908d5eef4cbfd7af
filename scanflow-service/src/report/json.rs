// JSON Inventory
// Full project inventory: headers, packages, dependencies, files, relations, messages

use crate::models::{
    CodebaseRelation, CodebaseResource, DiscoveredDependency, DiscoveredPackage, ProjectMessage,
    RunStatus,
};
use crate::report::{ReportEncoder, ReportResult, TOOL_NAME, TOOL_VERSION};
use crate::store::{ObjectCounts, ProjectSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHeader {
    pub uuid: Uuid,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub execution_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryHeaders {
    pub tool_name: String,
    pub tool_version: String,
    pub project_name: String,
    pub project_uuid: Uuid,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub runs: Vec<RunHeader>,
    #[serde(default)]
    pub counts: ObjectCounts,
}

/// A resource with the package-urls of the packages it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(flatten)]
    pub resource: CodebaseResource,
    #[serde(default)]
    pub for_packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub headers: InventoryHeaders,
    #[serde(default)]
    pub packages: Vec<DiscoveredPackage>,
    #[serde(default)]
    pub dependencies: Vec<DiscoveredDependency>,
    #[serde(default)]
    pub files: Vec<InventoryFile>,
    #[serde(default)]
    pub relations: Vec<CodebaseRelation>,
    #[serde(default)]
    pub messages: Vec<ProjectMessage>,
}

impl Inventory {
    pub fn from_snapshot(snapshot: &ProjectSnapshot) -> Self {
        let runs = snapshot
            .runs
            .iter()
            .map(|run| RunHeader {
                uuid: run.id,
                pipeline_name: run.pipeline_name.clone(),
                status: run.status,
                created_at: run.created_at,
                started_at: run.started_at,
                ended_at: run.ended_at,
                execution_time: run.execution_time(),
            })
            .collect();

        let by_resource = snapshot.packages_by_resource();
        let files = snapshot
            .resources
            .iter()
            .map(|resource| InventoryFile {
                resource: resource.clone(),
                for_packages: by_resource
                    .get(resource.path.as_str())
                    .into_iter()
                    .flatten()
                    .map(|package| package.package_url())
                    .collect(),
            })
            .collect();

        Self {
            headers: InventoryHeaders {
                tool_name: TOOL_NAME.to_string(),
                tool_version: TOOL_VERSION.to_string(),
                project_name: snapshot.project.name.clone(),
                project_uuid: snapshot.project.id,
                generated_at: Utc::now(),
                runs,
                counts: snapshot.object_counts(),
            },
            packages: snapshot.packages.clone(),
            dependencies: snapshot.dependencies.clone(),
            files,
            relations: snapshot.relations.clone(),
            messages: snapshot.messages.clone(),
        }
    }
}

/// Read back an inventory written by [`JsonEncoder`]
pub fn parse_inventory(content: &[u8]) -> ReportResult<Inventory> {
    Ok(serde_json::from_slice(content)?)
}

pub struct JsonEncoder;

impl ReportEncoder for JsonEncoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn encode(&self, snapshot: &ProjectSnapshot) -> ReportResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&Inventory::from_snapshot(snapshot))?)
    }
}
