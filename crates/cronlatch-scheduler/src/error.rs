use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Losing a claim race is not represented here; it is a normal outcome.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A rule contains values outside the range of its unit.
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A job with the given ID already exists.
    #[error("Job already exists: {id}")]
    DuplicateJob { id: String },

    /// A job handler returned an error and the pass runs fail-fast.
    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    /// A job handler panicked and the pass runs fail-fast.
    #[error("Job {job_id} panicked: {message}")]
    JobPanicked { job_id: String, message: String },

    /// Rule (de)serialisation failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
