//! Error types for distcoord

use crate::coordinator::keys::Key;
use crate::coordinator::session::SessionId;
use crate::pool::WorkerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Session Errors ===
    #[error("Session mismatch: operand belongs to {found}, expected {expected}")]
    ContextMismatch {
        expected: SessionId,
        found: SessionId,
    },

    #[error("Worker {0} is not registered in the pool")]
    UnknownWorker(WorkerId),

    // === Key Errors ===
    #[error("Key {0} is not known by this registry")]
    UnknownKey(Key),

    #[error("Found {0} leftover keys after cleanup")]
    LeakedKeys(usize),

    // === Group Errors ===
    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    #[error("Inconsistent group ranks: {0}")]
    InconsistentRank(String),

    // === Dispatch Errors ===
    #[error("Invalid operands: {0}")]
    OperandType(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation {op} takes {expected} operands, got {actual}")]
    Arity {
        op: String,
        expected: usize,
        actual: usize,
    },

    // === Worker-side Errors ===
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Shape mismatch: {left} vs {right} elements")]
    ShapeMismatch { left: usize, right: usize },

    #[error("Worker {worker} failed: {reason}")]
    Worker { worker: WorkerId, reason: String },

    // === Transport Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Faults that signal a bug in the coordinator or the transport rather
    /// than misuse. They must not be caught and retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InconsistentRank(_) | Error::LeakedKeys(_))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", e))
    }
}
