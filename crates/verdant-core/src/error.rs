use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerdantError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid period: from {from} is after to {to}")]
    InvalidPeriod { from: String, to: String },

    #[error("Unknown time zone: {0}")]
    UnknownTimezone(String),
}

impl VerdantError {
    /// Short error code string used in structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            VerdantError::Config(_) => "CONFIG_ERROR",
            VerdantError::InvalidPeriod { .. } => "INVALID_PERIOD",
            VerdantError::UnknownTimezone(_) => "UNKNOWN_TIMEZONE",
        }
    }
}

pub type Result<T> = std::result::Result<T, VerdantError>;
