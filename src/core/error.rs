use std::io;
use thiserror::Error;

/// Crate-wide error type. Variants map one-to-one onto the mesh error
/// taxonomy surfaced by the CLI (`not_found`, `invalid_state`, ...).
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("invalid_state: {0}")]
    InvalidState(String),
    #[error("capacity: {0}")]
    Capacity(String),
    #[error("integrity: {0}")]
    Integrity(String),
    #[error("policy: {0}")]
    Policy(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("handler: {0}")]
    Handler(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl MeshError {
    /// Stable machine-readable kind tag, used in envelopes and ledger events.
    pub fn kind(&self) -> &'static str {
        match self {
            MeshError::NotFound(_) => "not_found",
            MeshError::InvalidState(_) => "invalid_state",
            MeshError::Capacity(_) => "capacity",
            MeshError::Integrity(_) => "integrity",
            MeshError::Policy(_) => "policy",
            MeshError::Io(_) => "io",
            MeshError::Handler(_) => "handler",
            MeshError::Json(_) => "json",
        }
    }
}

pub type MeshResult<T> = Result<T, MeshError>;
