//! Error types for process groups

use thiserror::Error;

use crate::types::NodeId;

/// Result type for group operations
pub type PgResult<T> = Result<T, PgError>;

/// Main error type for group operations
#[derive(Error, Debug)]
pub enum PgError {
    /// Join target had already terminated
    #[error("Process {0} is not alive")]
    NotAlive(String),

    /// Leave of a membership that does not exist
    #[error("Process {0} is not in the group")]
    NotInGroup(String),

    /// Mutation reached a node that does not own the process
    #[error("Node {node} does not own process {pid}")]
    NotOwner { node: NodeId, pid: String },

    /// Owner did not answer in time
    #[error("Call timed out: {0}")]
    Timeout(String),

    /// Coordinator mailbox is closed
    #[error("Coordinator stopped: {0}")]
    CoordinatorStopped(String),

    /// No route to the node
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// Owner answered with a reply the caller did not expect
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for PgError {
    fn from(err: toml::de::Error) -> Self {
        PgError::Config(err.to_string())
    }
}

impl From<bincode::Error> for PgError {
    fn from(err: bincode::Error) -> Self {
        PgError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PgError::NotInGroup("<0a1b2c3d.4> / \"workers\"".to_string());
        assert_eq!(err.to_string(), "Process <0a1b2c3d.4> / \"workers\" is not in the group");

        let err = PgError::Timeout("join after 5000ms".to_string());
        assert_eq!(err.to_string(), "Call timed out: join after 5000ms");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PgError = io.into();
        assert!(matches!(err, PgError::Io(_)));
    }
}
