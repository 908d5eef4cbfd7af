pub mod project_handler;
pub mod report_handler;
pub mod run_handler;

pub use project_handler::ProjectHandler;
pub use report_handler::ReportHandler;
pub use run_handler::RunHandler;

use crate::error::{RpcError, RpcResult};
use uuid::Uuid;

/// Parse a run or project identifier given on the command surface
pub fn parse_id(value: &str) -> RpcResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| RpcError::InvalidRequest(format!("'{}' is not a valid identifier", value)))
}
