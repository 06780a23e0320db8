//! Error types for hpcrag.

use thiserror::Error;

/// Result type alias using hpcrag's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for hpcrag operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Remote host unreachable or authentication rejected
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote or local resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job submission failed (see [`SubmissionError`])
    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    /// No job with this id is tracked
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Operation requires a terminal job
    #[error("Job not terminal: {0}")]
    JobNotTerminal(uuid::Uuid),

    /// Remote command ran but reported failure
    #[error("Remote command failed: {0}")]
    Remote(String),

    /// Vector or graph store write failed
    #[error("Store error: {0}")]
    Store(String),

    /// Remote command or operation exceeded its time limit
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Why a submission did not produce a scheduler job.
///
/// Submission failures never create a job record; the caller receives one of
/// these synchronously.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The scheduler kept rejecting with its submit-limit signature.
    #[error("submission limit still exceeded after {attempts} attempts: {stderr}")]
    LimitExhausted { attempts: u32, stderr: String },

    /// The scheduler rejected the script for a non-throttling reason.
    #[error("scheduler rejected submission: {0}")]
    Rejected(String),

    /// The submit command succeeded but its output carried no job id.
    #[error("unparseable scheduler response: {0:?}")]
    InvalidResponse(String),
}

impl SubmissionError {
    /// True when the failure was caused by scheduler throttling.
    pub fn is_throttling(&self) -> bool {
        matches!(self, SubmissionError::LimitExhausted { .. })
    }
}
