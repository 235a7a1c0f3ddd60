use thiserror::Error;

/// Errors raised while talking to the forecast provider.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Transport-level reqwest failure that is not a connect/timeout issue.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider unreachable (connection refused, connect or read timeout).
    #[error("Forecast provider unavailable: {0}")]
    Unavailable(String),

    /// Provider answered with a non-2xx status.
    #[error("Forecast provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected JSON shape.
    #[error("Malformed forecast response: {0}")]
    Parse(String),

    /// The configured base URL cannot be combined into a request URL.
    #[error("Invalid forecast URL: {0}")]
    InvalidUrl(String),
}

impl ForecastError {
    /// Whether another attempt could succeed. Transport failures and error
    /// statuses are worth retrying; a bad URL or an undecodable body is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ForecastError::Http(_) | ForecastError::Unavailable(_) | ForecastError::Api { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
