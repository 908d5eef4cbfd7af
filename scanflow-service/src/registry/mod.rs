// Step Registry
// Pipeline identifiers mapped to ordered step descriptors, built once and then read-only

pub mod catalog;

use crate::error::{ServiceError, ServiceResult, StepError};
use crate::execution::context::StepContext;
use crate::models::StepRecord;
use crate::steps::inputs::DownloadMissingInputs;
use crate::steps::{FnStep, Step};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Name of the step prepended to pipelines that download their inputs
pub const DOWNLOAD_STEP: &str = "download_missing_inputs";

/// One step of a pipeline
#[derive(Clone)]
pub struct StepDescriptor {
    pub name: String,
    pub summary: String,
    pub groups: Vec<String>,
    /// Abort the run on a recoverable failure of this step, even with continue-on-failure
    pub stop_on_failure: bool,
    pub step: Arc<dyn Step>,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>, summary: impl Into<String>, step: impl Step + 'static) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            groups: Vec::new(),
            stop_on_failure: false,
            step: Arc::new(step),
        }
    }

    /// Wrap a synchronous function as a step
    pub fn from_fn<F>(name: impl Into<String>, summary: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StepContext) -> Result<(), StepError> + Send + Sync + 'static,
    {
        Self::new(name, summary, FnStep(f))
    }

    pub fn in_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn stop_on_failure(mut self) -> Self {
        self.stop_on_failure = true;
        self
    }

    /// Keep the step when it has no groups or shares one with the selection
    fn is_selected(&self, groups: Option<&[String]>) -> bool {
        match groups {
            None => true,
            Some(_) if self.groups.is_empty() => true,
            Some(selected) => self.groups.iter().any(|g| selected.contains(g)),
        }
    }

    /// Run-record snapshot of this descriptor
    pub fn record(&self) -> StepRecord {
        let mut record = StepRecord::new(self.name.clone(), self.summary.clone());
        record.groups = self.groups.clone();
        record.stop_on_failure = self.stop_on_failure;
        record
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("stop_on_failure", &self.stop_on_failure)
            .finish()
    }
}

/// A named pipeline: metadata plus its ordered steps
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub summary: String,
    pub description: String,
    /// Add-on pipelines cannot be the first pipeline run on a project
    pub is_addon: bool,
    /// Prepend the download step that fetches missing inputs
    pub download_inputs: bool,
    pub steps: Vec<StepDescriptor>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            description: String::new(),
            is_addon: false,
            download_inputs: true,
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn addon(mut self) -> Self {
        self.is_addon = true;
        self.download_inputs = false;
        self
    }

    pub fn without_download(mut self) -> Self {
        self.download_inputs = false;
        self
    }

    pub fn step(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    /// Sorted union of the groups used by the steps
    pub fn available_groups(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|s| s.groups.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Serializable description of a pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    pub name: String,
    pub summary: String,
    pub description: String,
    pub is_addon: bool,
    pub steps: Vec<StepInfo>,
    pub available_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepInfo {
    pub name: String,
    pub summary: String,
    pub groups: Vec<String>,
}

/// Collects pipelines before the registry is frozen
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    pipelines: BTreeMap<String, PipelineDefinition>,
    aliases: BTreeMap<String, String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pipeline; identifiers must be unique
    pub fn register(mut self, pipeline: PipelineDefinition) -> ServiceResult<Self> {
        if self.pipelines.contains_key(&pipeline.name) || self.aliases.contains_key(&pipeline.name) {
            return Err(ServiceError::DuplicatePipeline(pipeline.name));
        }
        self.pipelines.insert(pipeline.name.clone(), pipeline);
        Ok(self)
    }

    /// Accept `legacy` as another name for `canonical`
    pub fn alias(mut self, legacy: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(legacy.into(), canonical.into());
        self
    }

    pub fn build(self) -> StepRegistry {
        StepRegistry {
            pipelines: self.pipelines,
            aliases: self.aliases,
            download_step: StepDescriptor::new(
                DOWNLOAD_STEP,
                "Download any input source missing on disk.",
                DownloadMissingInputs,
            )
            .stop_on_failure(),
        }
    }
}

/// Immutable pipeline registry, shared through `Arc`
#[derive(Debug)]
pub struct StepRegistry {
    pipelines: BTreeMap<String, PipelineDefinition>,
    aliases: BTreeMap<String, String>,
    download_step: StepDescriptor,
}

impl StepRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Translate legacy names to their current identifier
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn resolve(&self, name: &str) -> ServiceResult<&PipelineDefinition> {
        self.pipelines
            .get(self.canonical_name(name))
            .ok_or_else(|| ServiceError::UnknownPipeline {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Steps to execute for a pipeline, filtered by group selection, with
    /// the download step first when the pipeline asks for it
    pub fn resolve_steps(
        &self,
        name: &str,
        groups: Option<&[String]>,
    ) -> ServiceResult<Vec<StepDescriptor>> {
        let pipeline = self.resolve(name)?;
        let mut steps = Vec::with_capacity(pipeline.steps.len() + 1);
        if pipeline.download_inputs {
            steps.push(self.download_step.clone());
        }
        steps.extend(
            pipeline
                .steps
                .iter()
                .filter(|s| s.is_selected(groups))
                .cloned(),
        );
        Ok(steps)
    }

    /// Find a step of a pipeline by name, including the download step
    pub fn find_step(&self, pipeline: &str, step: &str) -> Option<StepDescriptor> {
        if step == DOWNLOAD_STEP {
            return Some(self.download_step.clone());
        }
        self.resolve(pipeline)
            .ok()?
            .steps
            .iter()
            .find(|s| s.name == step)
            .cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.values()
    }

    pub fn info(&self, name: &str) -> ServiceResult<PipelineInfo> {
        let pipeline = self.resolve(name)?;
        Ok(PipelineInfo {
            name: pipeline.name.clone(),
            summary: pipeline.summary.clone(),
            description: pipeline.description.clone(),
            is_addon: pipeline.is_addon,
            steps: pipeline
                .steps
                .iter()
                .map(|s| StepInfo {
                    name: s.name.clone(),
                    summary: s.summary.clone(),
                    groups: s.groups.clone(),
                })
                .collect(),
            available_groups: pipeline.available_groups(),
        })
    }
}

/// Split "pipeline:group1,group2" into the name and the selected groups
pub fn parse_pipeline_selection(value: &str) -> (String, Option<Vec<String>>) {
    match value.split_once(':') {
        Some((name, groups)) => {
            let groups: Vec<String> = groups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect();
            (name.trim().to_string(), Some(groups).filter(|g| !g.is_empty()))
        }
        None => (value.trim().to_string(), None),
    }
}
