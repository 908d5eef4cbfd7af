// Models Module
// Domain records: projects, runs, resources, packages, dependencies, relations, messages

pub mod dependency;
pub mod message;
pub mod package;
pub mod project;
pub mod relation;
pub mod resource;
pub mod run;

pub use dependency::{DependencyData, DiscoveredDependency};
pub use message::{ProjectMessage, Severity};
pub use package::{DiscoveredPackage, PackageData, PackageUrl, PurlError, VulnerabilityRef};
pub use project::{InputSource, Project, ProjectId, ProjectSettings};
pub use relation::CodebaseRelation;
pub use resource::{normalize_path, status, CodebaseResource, NewResource, ResourceKey, ResourceType};
pub use run::{Run, RunId, RunOptions, RunStatus, StepRecord, StepStatus};
