use thiserror::Error;

/// Errors from repository operations (used by trait definitions in owlflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised while loading or checking a workflow definition.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to parse workflow: {0}")]
    Parse(String),

    #[error("failed to serialize workflow: {0}")]
    Serialize(String),

    #[error("failed to read workflow file '{path}': {message}")]
    Io { path: String, message: String },

    #[error("invalid workflow definition: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
