//! Error taxonomy for fleet operations.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("instance {0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("{0} is not available on this host")]
    ToolUnavailable(String),

    #[error("control endpoint error: {0}")]
    Transport(String),

    #[error("snapshot failed: {0}")]
    Snapshot(String),

    #[error("release unavailable: {0}")]
    Release(String),

    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("gave up after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Coarse category a transport layer can map onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Permission,
    Unavailable,
    Internal,
}

impl FleetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::Validation(_) => ErrorKind::Validation,
            FleetError::NotFound(_) => ErrorKind::NotFound,
            FleetError::Conflict(_) => ErrorKind::Conflict,
            FleetError::Permission(_) => ErrorKind::Permission,
            FleetError::ToolUnavailable(_)
            | FleetError::Transport(_)
            | FleetError::Timeout(_)
            | FleetError::Cancelled => ErrorKind::Unavailable,
            FleetError::Snapshot(_)
            | FleetError::Release(_)
            | FleetError::Identity(_)
            | FleetError::Io(_)
            | FleetError::Serde(_) => ErrorKind::Internal,
        }
    }

    /// Short message safe to show to a caller: no filesystem paths, no tool
    /// output.
    pub fn public_message(&self) -> String {
        match self {
            FleetError::Validation(_)
            | FleetError::NotFound(_)
            | FleetError::Conflict(_)
            | FleetError::Permission(_)
            | FleetError::ToolUnavailable(_)
            | FleetError::Cancelled => self.to_string(),
            FleetError::Transport(_) => "the instance did not respond".to_string(),
            FleetError::Timeout(_) => "the instance did not stop in time".to_string(),
            FleetError::Snapshot(_) => "backup failed".to_string(),
            FleetError::Release(_) => "the requested release is not available".to_string(),
            FleetError::Identity(_) => "could not resolve that player".to_string(),
            FleetError::Io(_) | FleetError::Serde(_) => "internal storage error".to_string(),
        }
    }
}

impl From<rcon::RconError> for FleetError {
    fn from(err: rcon::RconError) -> Self {
        FleetError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_paths() {
        let err = FleetError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "/srv/mc/servers/abc/managed.json: no such file",
        ));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.public_message().contains("/srv"));
    }

    #[test]
    fn test_transport_errors_are_unavailable() {
        let err: FleetError = rcon::RconError::AuthRejected.into();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.public_message(), "the instance did not respond");
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = FleetError::Validation("unknown flavor 'forge'".to_string());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.public_message(), "invalid request: unknown flavor 'forge'");
    }
}
