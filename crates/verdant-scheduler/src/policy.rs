//! Carbon-aware decision policy for deferred jobs.
//!
//! Rules, first match wins:
//!
//! 1. deadline passed: commit now
//! 2. deadline less than an hour away: commit now
//! 3. no forecast data for the rest of the window: commit now if the deadline
//!    is today, or tomorrow and it is already 18:00 local; otherwise wait
//! 4. schedule at the lowest-ranked bucket still ahead in the window
//!
//! "Commit now" means `Scheduled(preferred_instant)` when the preferred
//! instant is still in the future, `Enqueued` otherwise.

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use tracing::debug;
use verdant_core::Period;
use verdant_forecast::ForecastSnapshot;

use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::state::{JobState, StateKind};

pub const DEADLINE_PASSED: &str = "Passed its deadline, scheduling now.";
pub const ABOUT_TO_PASS_DEADLINE: &str = "About to pass its deadline, scheduling now.";
pub const NO_FORECAST_FALLBACK: &str =
    "No forecast data available, falling back to the preferred instant.";
pub const MINIMIZE_IMPACT: &str = "Scheduled to minimize impact.";

/// Local hour from which a deadline falling tomorrow is committed without data.
pub const FALLBACK_CUTOFF_HOUR: u32 = 18;

fn deadline_margin() -> Duration {
    Duration::hours(1)
}

/// What to do with one awaiting job.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Stay awaiting; re-evaluate on the next tick.
    Wait,
    /// Leave the awaiting state.
    Transition { state: JobState, reason: &'static str },
}

impl Decision {
    pub fn is_wait(&self) -> bool {
        matches!(self, Decision::Wait)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CarbonAwarePolicy {
    /// Zone for calendar-day decisions when the snapshot does not name one.
    reference_zone: Tz,
}

impl CarbonAwarePolicy {
    pub fn new(reference_zone: Tz) -> Self {
        Self { reference_zone }
    }

    pub fn reference_zone(&self) -> Tz {
        self.reference_zone
    }

    /// Pure decision for an awaiting window.
    pub fn decide(
        &self,
        period: &Period,
        preferred_instant: Option<DateTime<Utc>>,
        snapshot: &ForecastSnapshot,
        now: DateTime<Utc>,
    ) -> Decision {
        let deadline = period.deadline();

        if now > deadline {
            return commit_now(preferred_instant, now, DEADLINE_PASSED);
        }

        if now > deadline - deadline_margin() {
            return commit_now(preferred_instant, now, ABOUT_TO_PASS_DEADLINE);
        }

        if !snapshot.has_data_for_period(period, now) {
            let zone = snapshot.timezone().unwrap_or(self.reference_zone);
            let local_now = now.with_timezone(&zone);
            let today = local_now.date_naive();
            let deadline_day = deadline.with_timezone(&zone).date_naive();

            let deadline_is_today = today == deadline_day;
            let deadline_is_tomorrow_evening = deadline_day.pred_opt() == Some(today)
                && local_now.hour() >= FALLBACK_CUTOFF_HOUR;

            if deadline_is_today || deadline_is_tomorrow_evening {
                return commit_now(preferred_instant, now, NO_FORECAST_FALLBACK);
            }
            return Decision::Wait;
        }

        match snapshot.least_expensive_instant(period, now) {
            Some(at) => Decision::Transition {
                state: JobState::scheduled(at, MINIMIZE_IMPACT, now),
                reason: MINIMIZE_IMPACT,
            },
            None => Decision::Wait,
        }
    }

    /// Decide for `job`, which must be awaiting.
    pub fn decide_for(&self, job: &Job, snapshot: &ForecastSnapshot, now: DateTime<Utc>) -> Result<Decision> {
        match job.state() {
            JobState::Awaiting {
                period,
                preferred_instant,
                ..
            } => Ok(self.decide(period, *preferred_instant, snapshot, now)),
            other => Err(SchedulerError::UnexpectedState {
                expected: StateKind::Awaiting,
                actual: other.kind(),
            }),
        }
    }

    /// Decide for `job` and apply the resulting transition in memory.
    ///
    /// Persisting the changed job is the caller's responsibility.
    pub fn evaluate(&self, job: &mut Job, snapshot: &ForecastSnapshot, now: DateTime<Utc>) -> Result<Decision> {
        let decision = self.decide_for(job, snapshot, now)?;
        match &decision {
            Decision::Wait => {
                debug!(job_id = %job.id(), "job left awaiting");
            }
            Decision::Transition { state, .. } => {
                job.exit_awaiting(state.clone())?;
            }
        }
        Ok(decision)
    }
}

fn commit_now(
    preferred_instant: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    reason: &'static str,
) -> Decision {
    let state = match preferred_instant {
        Some(at) if at > now => JobState::scheduled(at, reason, now),
        _ => JobState::enqueued(now),
    };
    Decision::Transition { state, reason }
}
