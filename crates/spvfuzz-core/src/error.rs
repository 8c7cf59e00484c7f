//! Error types for the transformation engine.
//!
//! An operator that is merely not applicable never produces an `Error`; it
//! answers `false` from `is_applicable`. Everything in this enum is either an
//! I/O or serialization failure at the workspace boundary, or a broken caller
//! contract that must abort the session.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller broke an API precondition, e.g. applied a transformation
    /// that was not applicable or supplied an id that is already in use.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// The id space or the overflow pool ran dry.
    #[error("Id overflow: {0}")]
    IdOverflow(String),

    /// The structured control flow of a function could not be analyzed.
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Returns true for errors that indicate an engine or driver bug rather
    /// than a bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ContractViolation(_) | Error::IdOverflow(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
