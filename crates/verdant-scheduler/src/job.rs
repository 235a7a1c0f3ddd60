use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use verdant_core::{JobId, Period};

use crate::error::{Result, SchedulerError};
use crate::failure::FailureDescription;
use crate::state::{is_allowed, JobState, StateKind};

/// A job and its append-only state history.
///
/// The current state is the last history entry. Every change goes through
/// [`Job::apply_transition`], which enforces the transition table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    id: JobId,
    name: String,
    /// Persisted version used for optimistic concurrency; 0 before first insert.
    version: u64,
    history: Vec<JobState>,
}

impl Job {
    /// Create a job in `initial` state.
    pub fn new(name: impl Into<String>, initial: JobState) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            version: 0,
            history: vec![initial],
        }
    }

    /// Create a job deferred to `period`, preferring the window start.
    pub fn deferred(name: impl Into<String>, period: Period, now: DateTime<Utc>) -> Self {
        Self::new(name, JobState::awaiting(period, now))
    }

    /// Rebuild a job read from storage. `history` must not be empty.
    pub fn from_parts(
        id: JobId,
        name: String,
        version: u64,
        history: Vec<JobState>,
    ) -> Result<Self> {
        if history.is_empty() {
            return Err(SchedulerError::CorruptRecord(format!(
                "job {id} has an empty state history"
            )));
        }
        Ok(Self {
            id,
            name,
            version,
            history,
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn state(&self) -> &JobState {
        // Non-empty by construction.
        &self.history[self.history.len() - 1]
    }

    pub fn state_kind(&self) -> StateKind {
        self.state().kind()
    }

    /// Append `new_state` if the table allows the move from the current state.
    pub fn apply_transition(&mut self, new_state: JobState) -> Result<()> {
        let from = self.state_kind();
        let to = new_state.kind();
        if !is_allowed(from, to) {
            return Err(SchedulerError::IllegalStateChange { from, to });
        }
        self.history.push(new_state);
        Ok(())
    }

    /// Leave the awaiting state. Fails if the job is not currently awaiting.
    pub fn exit_awaiting(&mut self, new_state: JobState) -> Result<()> {
        self.expect_kind(StateKind::Awaiting)?;
        self.apply_transition(new_state)
    }

    /// Commit the job to `at`. Awaiting jobs are rejected: they leave that
    /// state only through the decision policy.
    pub fn schedule(
        &mut self,
        at: DateTime<Utc>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.reject_awaiting()?;
        self.apply_transition(JobState::scheduled(at, reason, now))
    }

    /// Make the job ready for pickup. Rejects awaiting jobs like [`Job::schedule`].
    pub fn enqueue(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.reject_awaiting()?;
        self.apply_transition(JobState::enqueued(now))
    }

    pub fn start_processing(&mut self, runner_id: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.apply_transition(JobState::processing(runner_id, now))
    }

    /// Refresh the heartbeat of a processing job.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Result<()> {
        let actual = self.state_kind();
        match self.history.last_mut() {
            Some(JobState::Processing { updated_at, .. }) => {
                *updated_at = now;
                Ok(())
            }
            _ => Err(SchedulerError::UnexpectedState {
                expected: StateKind::Processing,
                actual,
            }),
        }
    }

    /// Mark a processing job as succeeded.
    ///
    /// Latency is measured from the last enqueue to the start of processing,
    /// duration from the start of processing to `now`.
    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<()> {
        let started = match self.state() {
            JobState::Processing { created_at, .. } => *created_at,
            other => {
                return Err(SchedulerError::UnexpectedState {
                    expected: StateKind::Processing,
                    actual: other.kind(),
                })
            }
        };
        let enqueued = self
            .history
            .iter()
            .rev()
            .find(|s| s.kind() == StateKind::Enqueued)
            .map(JobState::created_at)
            .unwrap_or(started);

        let latency = non_negative(started - enqueued);
        let duration = non_negative(now - started);
        self.apply_transition(JobState::succeeded(latency, duration, now))
    }

    pub fn fail(&mut self, cause: FailureDescription, now: DateTime<Utc>) -> Result<()> {
        self.apply_transition(JobState::failed(cause, now))
    }

    pub fn delete(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.apply_transition(JobState::deleted(reason, now))
    }

    fn reject_awaiting(&self) -> Result<()> {
        if self.state_kind() == StateKind::Awaiting {
            return Err(SchedulerError::UnexpectedState {
                expected: StateKind::Scheduled,
                actual: StateKind::Awaiting,
            });
        }
        Ok(())
    }

    fn expect_kind(&self, expected: StateKind) -> Result<()> {
        let actual = self.state_kind();
        if actual != expected {
            return Err(SchedulerError::UnexpectedState { expected, actual });
        }
        Ok(())
    }
}

fn non_negative(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}
