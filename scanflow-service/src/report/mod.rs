// Report Assembler
// Read-only project snapshots rendered by pluggable encoders

pub mod csv;
pub mod cyclonedx;
pub mod json;
pub mod spdx;
pub mod summary;

pub use json::{parse_inventory, Inventory};

use crate::error::ServiceError;
use crate::models::ProjectId;
use crate::store::{ProjectSnapshot, Store};

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Tool name written in report headers
pub const TOOL_NAME: &str = "scanflow";

/// Tool version written in report headers
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Unknown report format '{name}'. Available: {available}")]
    UnknownFormat { name: String, available: String },

    #[error("Cannot encode report: {0}")]
    Encoding(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Renders a project snapshot in one output format
pub trait ReportEncoder: Send + Sync {
    /// Format name used to select the encoder, e.g. "cyclonedx"
    fn name(&self) -> &'static str;

    /// File extension of written reports
    fn extension(&self) -> &'static str;

    fn encode(&self, snapshot: &ProjectSnapshot) -> ReportResult<Vec<u8>>;
}

/// Encoders by format name
#[derive(Clone, Default)]
pub struct ReportAssembler {
    encoders: BTreeMap<&'static str, Arc<dyn ReportEncoder>>,
}

impl ReportAssembler {
    /// Assembler without any encoder
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assembler with every built-in format
    pub fn new() -> Self {
        Self::empty()
            .with_encoder(json::JsonEncoder)
            .with_encoder(csv::CsvEncoder)
            .with_encoder(cyclonedx::CycloneDxEncoder)
            .with_encoder(spdx::SpdxEncoder)
            .with_encoder(summary::SummaryEncoder)
    }

    pub fn with_encoder(mut self, encoder: impl ReportEncoder + 'static) -> Self {
        self.encoders.insert(encoder.name(), Arc::new(encoder));
        self
    }

    pub fn formats(&self) -> Vec<&'static str> {
        self.encoders.keys().copied().collect()
    }

    pub fn encoder(&self, format: &str) -> ReportResult<Arc<dyn ReportEncoder>> {
        self.encoders
            .get(format.to_lowercase().as_str())
            .cloned()
            .ok_or_else(|| ReportError::UnknownFormat {
                name: format.to_string(),
                available: self.formats().join(", "),
            })
    }

    /// Encode the current state of a project
    pub fn render(&self, store: &Store, project: ProjectId, format: &str) -> ReportResult<Vec<u8>> {
        let encoder = self.encoder(format)?;
        let snapshot = store.snapshot(project)?;
        encoder.encode(&snapshot)
    }

    /// Encode a project and store the result under its output/ directory
    pub fn write_report(&self, store: &Store, project: ProjectId, format: &str) -> ReportResult<PathBuf> {
        let encoder = self.encoder(format)?;
        let snapshot = store.snapshot(project)?;
        let content = encoder.encode(&snapshot)?;

        let path = snapshot
            .project
            .output_file_path(&format!("results-{}", encoder.name()), encoder.extension());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        info!(project = %snapshot.project.name, path = %path.display(), "report written");
        Ok(path)
    }
}
