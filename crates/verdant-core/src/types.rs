use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, VerdantError};

/// Unique identifier for a job. UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Inclusive time window `[from, to]`.
///
/// Used both for job deferral windows and for forecast queries. The
/// constructor guarantees `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawPeriod {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TryFrom<RawPeriod> for Period {
    type Error = VerdantError;

    fn try_from(raw: RawPeriod) -> Result<Self> {
        Period::between(raw.from, raw.to)
    }
}

impl Period {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(VerdantError::InvalidPeriod {
                from: from.to_rfc3339(),
                to: to.to_rfc3339(),
            });
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    /// The deadline of a deferral window is its upper bound.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.to
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant <= self.to
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, h, 0, 0).unwrap()
    }

    #[test]
    fn period_rejects_inverted_bounds() {
        let err = Period::between(at(12), at(11)).unwrap_err();
        assert_eq!(err.code(), "INVALID_PERIOD");
    }

    #[test]
    fn period_contains_is_inclusive() {
        let p = Period::between(at(11), at(21)).unwrap();
        assert!(p.contains(at(11)));
        assert!(p.contains(at(21)));
        assert!(!p.contains(at(22)));
        assert_eq!(p.deadline(), at(21));
    }

    #[test]
    fn period_deserialize_validates() {
        let json = r#"{"from":"2024-03-12T12:00:00Z","to":"2024-03-12T11:00:00Z"}"#;
        assert!(serde_json::from_str::<Period>(json).is_err());

        let json = r#"{"from":"2024-03-12T11:00:00Z","to":"2024-03-12T21:00:00Z"}"#;
        let p: Period = serde_json::from_str(json).unwrap();
        assert_eq!(p.from(), at(11));
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }
}
