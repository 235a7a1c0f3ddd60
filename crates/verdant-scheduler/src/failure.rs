//! Structured description of why a job failed.
//!
//! Failures are stored as data (kind, message, cause chain) so they can be
//! read back without knowing the concrete error type that produced them.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescription {
    /// Type or category of the error, e.g. `std::io::Error`.
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<FailureDescription>>,
}

/// Outcome of reading a failure back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredFailure {
    Structured(FailureDescription),
    /// The stored text could not be turned back into a description; the
    /// original type and message strings are kept for diagnostics.
    NotReconstructable { kind: String, message: String },
}

impl FailureDescription {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: FailureDescription) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Capture `err` and its `source()` chain.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut sources = Vec::new();
        let mut next = err.source();
        while let Some(source) = next {
            sources.push(FailureDescription::new("cause", source.to_string()));
            next = source.source();
        }

        let cause = sources.into_iter().rev().fold(None, |inner, mut outer| {
            outer.cause = inner.map(Box::new);
            Some(outer)
        });

        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            cause: cause.map(Box::new),
        }
    }

    /// Iterate this description and each nested cause, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &FailureDescription> {
        std::iter::successors(Some(self), |d| d.cause.as_deref())
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Read a stored failure.
    ///
    /// JSON descriptions come back structured. Anything else (for instance a
    /// legacy `kind: message` line) is returned as
    /// [`StoredFailure::NotReconstructable`].
    pub fn decode(raw: &str) -> StoredFailure {
        if let Ok(description) = serde_json::from_str::<FailureDescription>(raw) {
            return StoredFailure::Structured(description);
        }

        let first_line = raw.lines().next().unwrap_or_default().trim();
        match first_line.split_once(": ") {
            Some((kind, message)) if !kind.is_empty() && !kind.contains(char::is_whitespace) => {
                StoredFailure::NotReconstructable {
                    kind: kind.to_string(),
                    message: message.to_string(),
                }
            }
            _ => StoredFailure::NotReconstructable {
                kind: "unknown".to_string(),
                message: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}
