//! Error types for instance operations

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for instance operations
pub type InstanceResult<T> = Result<T, InstanceError>;

/// Errors that can occur while managing the instance catalog
#[derive(Debug, Error)]
pub enum InstanceError {
    /// An instance with this id is already in the registry
    #[error("duplicate instance: {0}")]
    Duplicate(String),

    /// The id is not 32 hexadecimal characters
    #[error("invalid instance id: {0}")]
    InvalidId(String),

    /// Absent locally and not resolvable through the control-plane, either
    /// because there is no link or because it answered something other than 200
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// The command envelope named a command nobody handles
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A backing file name does not follow `instance-<uuid>.conf`
    #[error("invalid instance file name: {}", .0.display())]
    InvalidFileName(PathBuf),

    /// File access on a backing file failed
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding a record failed
    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The control-plane could not be reached
    #[error("request to {url} failed: {message}")]
    Remote { url: String, message: String },

    /// The operation needs a database instance
    #[error("don't know how to get info for instance {0}: not a MySQL instance")]
    NotDatabase(String),

    /// The database instance carries no connection string
    #[error("MySQL instance {0} DSN is not set")]
    MissingDsn(String),

    /// The metadata probe failed
    #[error("metadata probe failed: {0}")]
    Probe(String),
}

impl InstanceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InstanceError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        InstanceError::Json {
            context: context.into(),
            source,
        }
    }
}
