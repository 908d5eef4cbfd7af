// Scanflow Service Library
// Pipeline engine, resource graph store and reports for software composition analysis

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod registry;
pub mod report;
pub mod steps;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult, StepError, StoreError};

pub use config::{ConfigError, EngineConfig};
pub use logging::{init_logging, LoggingConfig};

// Re-export model types
pub use models::{
    CodebaseRelation, CodebaseResource, DependencyData, DiscoveredDependency, DiscoveredPackage,
    InputSource, PackageData, PackageUrl, Project, ProjectId, ProjectMessage, Run, RunId,
    RunOptions, RunStatus, Severity, StepRecord, StepStatus,
};

// Re-export execution types
pub use execution::{
    progress_channel, CancelToken, ExecutionEvent, ProgressReceiver, ProgressSender,
    RunController, StepContext,
};

pub use registry::{PipelineDefinition, PipelineInfo, StepDescriptor, StepRegistry};
pub use report::{ReportAssembler, ReportEncoder, ReportError};
pub use steps::{ExternalServices, Step};
pub use store::{ProjectScope, ProjectSnapshot, Store};
