// Store Aggregations
// Counts and summaries computed over a project snapshot

use crate::models::Severity;
use crate::store::snapshot::ProjectSnapshot;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label used for resources without a status
pub const NO_STATUS: &str = "(no status)";

/// Label used for packages without a declared license
pub const NO_LICENSE: &str = "(no license)";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCounts {
    pub resources: usize,
    pub files: usize,
    pub directories: usize,
    pub packages: usize,
    pub dependencies: usize,
    pub relations: usize,
    pub messages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySummary {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub runtime: usize,
    pub optional: usize,
    pub by_scope: BTreeMap<String, usize>,
}

impl ProjectSnapshot {
    pub fn object_counts(&self) -> ObjectCounts {
        ObjectCounts {
            resources: self.resources.len(),
            files: self.resources.iter().filter(|r| r.is_file()).count(),
            directories: self.resources.iter().filter(|r| r.is_dir()).count(),
            packages: self.packages.len(),
            dependencies: self.dependencies.len(),
            relations: self.relations.len(),
            messages: self.messages.len(),
        }
    }

    /// Resource count per status tag, with untagged resources under [`NO_STATUS`]
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for resource in &self.resources {
            let key = match resource.status.as_deref() {
                Some(status) if !status.is_empty() => status.to_string(),
                _ => NO_STATUS.to_string(),
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    /// Package count per declared license expression
    pub fn license_summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for package in &self.packages {
            let key = package
                .declared_license_expression
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| NO_LICENSE.to_string());
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    pub fn dependency_summary(&self) -> DependencySummary {
        let mut summary = DependencySummary::default();
        for dependency in &self.dependencies {
            summary.total += 1;
            if dependency.is_resolved {
                summary.resolved += 1;
            } else {
                summary.unresolved += 1;
            }
            if dependency.is_runtime {
                summary.runtime += 1;
            }
            if dependency.is_optional {
                summary.optional += 1;
            }
            let scope = dependency.scope.clone().unwrap_or_else(|| "(none)".to_string());
            *summary.by_scope.entry(scope).or_insert(0) += 1;
        }
        summary
    }

    pub fn message_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for message in &self.messages {
            *counts.entry(message.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn vulnerable_packages(&self) -> usize {
        self.packages.iter().filter(|p| p.is_vulnerable()).count()
    }
}
