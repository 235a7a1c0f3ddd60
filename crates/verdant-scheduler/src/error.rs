use thiserror::Error;
use verdant_core::VerdantError;
use verdant_forecast::ForecastError;

use crate::state::StateKind;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The transition table forbids moving from `from` to `to`.
    #[error("Illegal state change from {from} to {to}")]
    IllegalStateChange { from: StateKind, to: StateKind },

    /// The caller assumed the job was in `expected` but it is in `actual`.
    #[error("Job is in state {actual}, expected {expected}")]
    UnexpectedState {
        expected: StateKind,
        actual: StateKind,
    },

    /// Another writer persisted a newer version of the job first.
    #[error("Job {id} was modified concurrently (expected version {expected_version})")]
    ConcurrentModification { id: String, expected_version: u64 },

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A stored state name does not match any known state.
    #[error("Unknown job state: {0}")]
    UnknownStateKind(String),

    /// A stored job record violates an invariant (e.g. empty history).
    #[error("Corrupt job record: {0}")]
    CorruptRecord(String),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Forecast error: {0}")]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Core(#[from] VerdantError),
}

impl SchedulerError {
    /// Short error code string used in structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::IllegalStateChange { .. } => "ILLEGAL_STATE_CHANGE",
            SchedulerError::UnexpectedState { .. } => "UNEXPECTED_STATE",
            SchedulerError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::UnknownStateKind(_) => "UNKNOWN_STATE",
            SchedulerError::CorruptRecord(_) => "CORRUPT_RECORD",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::Forecast(_) => "FORECAST_ERROR",
            SchedulerError::Core(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
