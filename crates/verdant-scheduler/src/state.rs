use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use verdant_core::Period;

use crate::error::SchedulerError;
use crate::failure::FailureDescription;

/// Discriminant of a [`JobState`], used by the transition table and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateKind {
    Awaiting,
    Scheduled,
    Enqueued,
    Processing,
    Succeeded,
    Failed,
    Deleted,
}

impl StateKind {
    pub const ALL: [StateKind; 7] = [
        StateKind::Awaiting,
        StateKind::Scheduled,
        StateKind::Enqueued,
        StateKind::Processing,
        StateKind::Succeeded,
        StateKind::Failed,
        StateKind::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Awaiting => "AWAITING",
            StateKind::Scheduled => "SCHEDULED",
            StateKind::Enqueued => "ENQUEUED",
            StateKind::Processing => "PROCESSING",
            StateKind::Succeeded => "SUCCEEDED",
            StateKind::Failed => "FAILED",
            StateKind::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StateKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AWAITING" => Ok(StateKind::Awaiting),
            "SCHEDULED" => Ok(StateKind::Scheduled),
            "ENQUEUED" => Ok(StateKind::Enqueued),
            "PROCESSING" => Ok(StateKind::Processing),
            "SUCCEEDED" => Ok(StateKind::Succeeded),
            "FAILED" => Ok(StateKind::Failed),
            "DELETED" => Ok(StateKind::Deleted),
            other => Err(SchedulerError::UnknownStateKind(other.to_string())),
        }
    }
}

/// Whether a job in `from` may move to `to`.
///
/// | From                | Allowed to                   |
/// |---------------------|------------------------------|
/// | Scheduled           | anything except Processing   |
/// | Enqueued            | anything except Enqueued     |
/// | Processing          | Succeeded, Failed, Deleted   |
/// | Failed, Succeeded   | Scheduled, Enqueued, Deleted |
/// | Deleted             | Scheduled, Enqueued          |
/// | Awaiting            | Scheduled, Enqueued          |
pub fn is_allowed(from: StateKind, to: StateKind) -> bool {
    use StateKind::*;
    match from {
        Scheduled => to != Processing,
        Enqueued => to != Enqueued,
        Processing => matches!(to, Succeeded | Failed | Deleted),
        Failed | Succeeded => matches!(to, Scheduled | Enqueued | Deleted),
        Deleted => matches!(to, Scheduled | Enqueued),
        Awaiting => matches!(to, Scheduled | Enqueued),
    }
}

pub fn is_illegal(from: StateKind, to: StateKind) -> bool {
    !is_allowed(from, to)
}

/// One entry in a job's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Deferred until the decision policy picks an instant inside `period`.
    Awaiting {
        created_at: DateTime<Utc>,
        period: Period,
        #[serde(default)]
        preferred_instant: Option<DateTime<Utc>>,
    },
    /// Committed to run at `at`.
    Scheduled {
        created_at: DateTime<Utc>,
        at: DateTime<Utc>,
        reason: String,
    },
    /// Ready for immediate pickup.
    Enqueued { created_at: DateTime<Utc> },
    /// Claimed by a runner; `updated_at` is the heartbeat.
    Processing {
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        runner_id: String,
    },
    Succeeded {
        created_at: DateTime<Utc>,
        /// Time spent enqueued before processing started.
        latency: Duration,
        /// Time spent processing.
        duration: Duration,
    },
    Failed {
        created_at: DateTime<Utc>,
        message: String,
        cause: FailureDescription,
    },
    Deleted {
        created_at: DateTime<Utc>,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl JobState {
    /// Awaiting state whose preferred instant is the start of the window.
    pub fn awaiting(period: Period, now: DateTime<Utc>) -> Self {
        JobState::Awaiting {
            created_at: now,
            period,
            preferred_instant: Some(period.from()),
        }
    }

    pub fn awaiting_with_preference(
        period: Period,
        preferred_instant: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        JobState::Awaiting {
            created_at: now,
            period,
            preferred_instant,
        }
    }

    pub fn scheduled(at: DateTime<Utc>, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        JobState::Scheduled {
            created_at: now,
            at,
            reason: reason.into(),
        }
    }

    pub fn enqueued(now: DateTime<Utc>) -> Self {
        JobState::Enqueued { created_at: now }
    }

    pub fn processing(runner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        JobState::Processing {
            created_at: now,
            updated_at: now,
            runner_id: runner_id.into(),
        }
    }

    pub fn succeeded(latency: Duration, duration: Duration, now: DateTime<Utc>) -> Self {
        JobState::Succeeded {
            created_at: now,
            latency,
            duration,
        }
    }

    pub fn failed(cause: FailureDescription, now: DateTime<Utc>) -> Self {
        JobState::Failed {
            created_at: now,
            message: cause.message.clone(),
            cause,
        }
    }

    pub fn deleted(reason: Option<String>, now: DateTime<Utc>) -> Self {
        JobState::Deleted {
            created_at: now,
            reason,
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            JobState::Awaiting { .. } => StateKind::Awaiting,
            JobState::Scheduled { .. } => StateKind::Scheduled,
            JobState::Enqueued { .. } => StateKind::Enqueued,
            JobState::Processing { .. } => StateKind::Processing,
            JobState::Succeeded { .. } => StateKind::Succeeded,
            JobState::Failed { .. } => StateKind::Failed,
            JobState::Deleted { .. } => StateKind::Deleted,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            JobState::Awaiting { created_at, .. }
            | JobState::Scheduled { created_at, .. }
            | JobState::Enqueued { created_at }
            | JobState::Processing { created_at, .. }
            | JobState::Succeeded { created_at, .. }
            | JobState::Failed { created_at, .. }
            | JobState::Deleted { created_at, .. } => *created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn table_matches_documented_edges() {
        use StateKind::*;
        let allowed: &[(StateKind, &[StateKind])] = &[
            (Scheduled, &[Awaiting, Scheduled, Enqueued, Succeeded, Failed, Deleted]),
            (Enqueued, &[Awaiting, Scheduled, Processing, Succeeded, Failed, Deleted]),
            (Processing, &[Succeeded, Failed, Deleted]),
            (Failed, &[Scheduled, Enqueued, Deleted]),
            (Succeeded, &[Scheduled, Enqueued, Deleted]),
            (Deleted, &[Scheduled, Enqueued]),
            (Awaiting, &[Scheduled, Enqueued]),
        ];
        for (from, targets) in allowed {
            for to in StateKind::ALL {
                assert_eq!(
                    is_allowed(*from, to),
                    targets.contains(&to),
                    "{from} -> {to}"
                );
                assert_eq!(is_illegal(*from, to), !targets.contains(&to));
            }
        }
    }

    #[test]
    fn kind_round_trips_through_its_name() {
        for kind in StateKind::ALL {
            assert_eq!(kind.as_str().parse::<StateKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_fails_loudly() {
        let err = "RETRYING".parse::<StateKind>().unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_STATE");
    }

    #[test]
    fn awaiting_defaults_preference_to_window_start() {
        let from = Utc.with_ymd_and_hms(2024, 3, 13, 3, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 13, 13, 0, 0).unwrap();
        let state = JobState::awaiting(Period::between(from, to).unwrap(), from);
        match state {
            JobState::Awaiting {
                preferred_instant, ..
            } => assert_eq!(preferred_instant, Some(from)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn state_serializes_with_tag() {
        let now = Utc.with_ymd_and_hms(2024, 3, 12, 11, 0, 0).unwrap();
        let json = serde_json::to_string(&JobState::enqueued(now)).unwrap();
        assert!(json.contains(r#""state":"ENQUEUED""#));
    }
}
