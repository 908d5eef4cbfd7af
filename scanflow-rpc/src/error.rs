use scanflow_service::report::ReportError;
use scanflow_service::{ConfigError, ServiceError};
use std::fmt;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug)]
pub enum RpcError {
    /// Unknown project, run or pipeline
    NotFound(String),
    /// Malformed identifiers, bad arguments, invalid configuration
    InvalidRequest(String),
    /// The request was valid but the engine refused it
    ServiceError(String),
    InternalError(String),
}

impl RpcError {
    /// Errors caused by the caller's input rather than by the engine
    pub fn is_usage_error(&self) -> bool {
        matches!(self, RpcError::NotFound(_) | RpcError::InvalidRequest(_))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RpcError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            RpcError::ServiceError(msg) => write!(f, "Service error: {}", msg),
            RpcError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<ServiceError> for RpcError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::ProjectNotFound(_) | ServiceError::RunNotFound(_) => {
                RpcError::NotFound(err.to_string())
            }
            ServiceError::UnknownPipeline { .. } => RpcError::InvalidRequest(err.to_string()),
            ServiceError::Io(_) | ServiceError::Serialization(_) => {
                RpcError::InternalError(err.to_string())
            }
            other => RpcError::ServiceError(other.to_string()),
        }
    }
}

impl From<ReportError> for RpcError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::UnknownFormat { .. } => RpcError::InvalidRequest(err.to_string()),
            ReportError::Service(inner) => inner.into(),
            other => RpcError::InternalError(other.to_string()),
        }
    }
}

impl From<ConfigError> for RpcError {
    fn from(err: ConfigError) -> Self {
        RpcError::InvalidRequest(err.to_string())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::InternalError(err.to_string())
    }
}
