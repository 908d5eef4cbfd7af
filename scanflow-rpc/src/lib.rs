pub mod api;
pub mod error;
pub mod handlers;
pub mod queue;

pub use api::RpcServer;
pub use error::{RpcError, RpcResult};
pub use handlers::{ProjectHandler, ReportHandler, RunHandler};
pub use queue::RunQueue;

// Re-export types needed by clients
pub use scanflow_service::{ExecutionEvent, ProgressReceiver, Run, RunStatus, StepStatus};
pub use scanflow_service;
