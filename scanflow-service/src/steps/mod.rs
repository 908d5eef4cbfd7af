// Pipeline Steps
// Step contract plus the built-in reference steps used by the pipeline catalog

pub mod archive;
pub mod codebase;
pub mod d2d;
pub mod docker;
pub mod elf;
pub mod index;
pub mod inputs;
pub mod manifests;
pub mod purldb;
pub mod rootfs;
pub mod sbom;
pub mod vulnerabilities;

use crate::error::StepError;
use crate::execution::context::StepContext;
use index::{PackageIndex, VulnerabilityIndex};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A unit of work inside a pipeline
///
/// Steps receive a context bound to the run's project. Returning
/// `StepError::Analysis` marks an expected failure the run may tolerate;
/// `StepError::Defect` (or a panic) aborts the run.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, ctx: &StepContext) -> Result<(), StepError>;
}

/// Adapter for synchronous step functions
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&StepContext) -> Result<(), StepError> + Send + Sync,
{
    async fn run(&self, ctx: &StepContext) -> Result<(), StepError> {
        (self.0)(ctx)
    }
}

/// External collaborators reachable from steps
#[derive(Clone, Default)]
pub struct ExternalServices {
    pub package_index: Option<Arc<dyn PackageIndex>>,
    pub vulnerability_index: Option<Arc<dyn VulnerabilityIndex>>,
}

impl ExternalServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package_index(mut self, index: Arc<dyn PackageIndex>) -> Self {
        self.package_index = Some(index);
        self
    }

    pub fn with_vulnerability_index(mut self, index: Arc<dyn VulnerabilityIndex>) -> Self {
        self.vulnerability_index = Some(index);
        self
    }
}

impl fmt::Debug for ExternalServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalServices")
            .field("package_index", &self.package_index.is_some())
            .field("vulnerability_index", &self.vulnerability_index.is_some())
            .finish()
    }
}
