// Project Message Model
// Append-only diagnostics attached to a project, a run, a resource or a package

use crate::models::project::ProjectId;
use crate::models::run::RunId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMessage {
    pub uuid: Uuid,
    pub project: ProjectId,
    pub run: Option<RunId>,
    pub severity: Severity,
    /// Name of the step or component that produced the message
    pub model: String,
    pub description: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub traceback: Option<String>,
    pub resource_path: Option<String>,
    pub package_uid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ProjectMessage {
    pub fn new(
        project: ProjectId,
        severity: Severity,
        model: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            project,
            run: None,
            severity,
            model: model.into(),
            description: description.into(),
            details: BTreeMap::new(),
            traceback: None,
            resource_path: None,
            package_uid: None,
            created_at: Utc::now(),
        }
    }

    pub fn error(project: ProjectId, model: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(project, Severity::Error, model, description)
    }

    pub fn warning(project: ProjectId, model: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(project, Severity::Warning, model, description)
    }

    pub fn info(project: ProjectId, model: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(project, Severity::Info, model, description)
    }

    pub fn with_run(mut self, run: RunId) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    pub fn for_resource(mut self, path: impl Into<String>) -> Self {
        self.resource_path = Some(path.into());
        self
    }

    pub fn for_package(mut self, package: Uuid) -> Self {
        self.package_uid = Some(package);
        self
    }
}
