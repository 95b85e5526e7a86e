//! Cubes Error Hierarchy
//!
//! Defines the error types surfaced by the blob cache, the entity store and the
//! node glue, categorized the way RPC callers see them (see [`ErrorKind`]).

use config::ConfigError;
use serde::Serialize;
use serde_json::json;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Blob engine and copy operation failures
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// Entity revision and lookup failures
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Infrastructure-level failures (disk, embedded db, serialization)
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Unknown operation id for the requesting client
    #[error("Operation {0} not found")]
    OpNotFound(u64),

    /// Malformed request parameters
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Outcome of a failed blob operation.
///
/// Cloned into every `complete` notification, so it carries no io handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum BlobError {
    #[error("Blob {0} not found")]
    NotFound(String),

    /// The operation was cancelled by `abort`
    #[error("Operation aborted")]
    Aborted,

    /// The external copy process exited with a failure status
    #[error("Copy process failed (code: {code:?}, signal: {signal:?})")]
    ProcessFailure {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Blob engine failure: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    #[error("Entity {id} not found")]
    NotFound { id: String },

    #[error("Entity {id} already exists")]
    Exists { id: String },

    /// The stored revision differs from the one the caller based its update on
    #[error("Entity {id} revision conflict (expected {expected_rev})")]
    Conflict { id: String, expected_rev: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Embedded database errors
    #[error(transparent)]
    SledError(#[from] sled::Error),

    /// Record encoding failures
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// Payload encoding failures
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(StorageError::IoError(e))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(StorageError::SledError(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Storage(StorageError::BincodeError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(StorageError::JsonError(e))
    }
}

/// Error taxonomy exposed to RPC callers and operation subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Aborted,
    ProcessFailure,
    BadParameter,
    Engine,
}

impl BlobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlobError::NotFound(_) => ErrorKind::NotFound,
            BlobError::Aborted => ErrorKind::Aborted,
            BlobError::ProcessFailure { .. } => ErrorKind::ProcessFailure,
            BlobError::Engine(_) => ErrorKind::Engine,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Blob(e) => e.kind(),
            Error::Entity(EntityError::NotFound { .. }) => ErrorKind::NotFound,
            Error::Entity(EntityError::Conflict { .. }) | Error::Entity(EntityError::Exists { .. }) => {
                ErrorKind::Conflict
            }
            Error::OpNotFound(_) => ErrorKind::NotFound,
            Error::BadParameter(_) | Error::InvalidConfig(_) => ErrorKind::BadParameter,
            Error::Storage(_) | Error::Config(_) | Error::Fatal(_) => ErrorKind::Engine,
        }
    }

    /// Structured error body returned to RPC callers
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        match self {
            Error::Blob(BlobError::NotFound(id))
            | Error::Entity(EntityError::NotFound { id })
            | Error::Entity(EntityError::Exists { id }) => {
                payload["id"] = json!(id);
            }
            Error::Entity(EntityError::Conflict { id, expected_rev }) => {
                payload["id"] = json!(id);
                payload["rev"] = json!(expected_rev);
            }
            Error::OpNotFound(op_id) => {
                payload["id"] = json!(op_id);
            }
            _ => {}
        }
        payload
    }

    /// Narrows any error into the cloneable form carried by `complete` events
    pub(crate) fn into_blob_error(self) -> BlobError {
        match self {
            Error::Blob(e) => e,
            other => BlobError::Engine(other.to_string()),
        }
    }
}
