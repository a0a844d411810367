//! Error taxonomy and its mapping onto `tonic::Status`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("container already exists: {0}")]
    ContainerAlreadyExists(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("resource download failed: {0}")]
    DownloadFailure(String),

    #[error("launch failed: {0}")]
    LaunchFailure(String),

    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

impl AgentError {
    /// Map to the gRPC status the facade returns to callers.
    pub fn to_status(&self) -> tonic::Status {
        match self {
            AgentError::Validation(msg) => tonic::Status::invalid_argument(msg.clone()),
            AgentError::ContainerAlreadyExists(id) => {
                tonic::Status::already_exists(format!("container already exists: {}", id))
            }
            AgentError::ContainerNotFound(id) => {
                tonic::Status::not_found(format!("container not found: {}", id))
            }
            AgentError::DownloadFailure(msg) => tonic::Status::internal(msg.clone()),
            AgentError::LaunchFailure(msg) => tonic::Status::internal(msg.clone()),
            AgentError::InternalInvariantViolation(msg) => tonic::Status::internal(msg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_not_found_status() {
        let err = AgentError::ContainerNotFound("c1".to_string());
        assert_eq!(err.to_status().code(), tonic::Code::NotFound);
    }

    #[test]
    fn already_exists_maps_to_already_exists_status() {
        let err = AgentError::ContainerAlreadyExists("c1".to_string());
        assert_eq!(err.to_status().code(), tonic::Code::AlreadyExists);
    }

    #[test]
    fn validation_maps_to_invalid_argument() {
        let err = AgentError::Validation("bad request".to_string());
        assert_eq!(err.to_status().code(), tonic::Code::InvalidArgument);
    }
}
