//! Drift-free periodic task scheduler.
//!
//! Each registered entry runs on its own tokio task. The next fire time is
//! always `previous scheduled fire + period`, so slow runs and timer jitter
//! never shift the long-run cadence. Runs of one entry are serialized: if a
//! run overshoots its slot, the next one starts as soon as it returns and
//! the entry catches back up to its grid. Each run executes on a task of
//! its own, so a panicking run is logged and the entry stays armed.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};

pub type EntryId = u64;

/// Observable state of one scheduled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Armed { next_fire_at: Instant },
    Running,
    /// Terminal.
    Cancelled,
}

/// Work fired by the [`PeriodicScheduler`].
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self);
}

struct FnTask<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> PeriodicTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        (self.f)().await
    }
}

/// Wrap an async closure as a [`PeriodicTask`].
pub fn task_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn PeriodicTask>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnTask {
        name: name.into(),
        f,
    })
}

struct Entry {
    name: String,
    cancel: watch::Sender<bool>,
    state: watch::Receiver<EntryState>,
    handle: Option<JoinHandle<()>>,
}

/// Registry of recurring tasks.
///
/// Dropping the scheduler cancels every entry; in-flight runs finish first.
/// Cancelled entries stay registered so [`state`](Self::state) keeps
/// reporting [`EntryState::Cancelled`] for them.
#[derive(Default)]
pub struct PeriodicScheduler {
    entries: DashMap<EntryId, Entry>,
    next_id: AtomicU64,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` to fire after `initial_delay`, then every `period`.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn schedule(
        &self,
        task: Arc<dyn PeriodicTask>,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<EntryId> {
        if period.is_zero() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "period of task '{}' must be greater than zero",
                task.name()
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let first_fire = Instant::now() + initial_delay;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(EntryState::Armed {
            next_fire_at: first_fire,
        });
        let name = task.name().to_string();

        let handle = tokio::spawn(drive(
            id, task, first_fire, period, cancel_rx, state_tx,
        ));

        info!(
            entry_id = id,
            task = %name,
            initial_delay_ms = initial_delay.as_millis() as u64,
            period_ms = period.as_millis() as u64,
            "periodic task armed"
        );
        self.entries.insert(
            id,
            Entry {
                name,
                cancel: cancel_tx,
                state: state_rx,
                handle: Some(handle),
            },
        );
        Ok(id)
    }

    /// Current state of an entry, `None` if the id was never issued.
    pub fn state(&self, id: EntryId) -> Option<EntryState> {
        self.entries.get(&id).map(|entry| {
            if *entry.cancel.borrow() {
                EntryState::Cancelled
            } else {
                *entry.state.borrow()
            }
        })
    }

    /// Cancel one entry. A run already in progress is allowed to finish.
    ///
    /// Returns `false` when the id is unknown.
    pub fn cancel(&self, id: EntryId) -> bool {
        match self.entries.get(&id) {
            Some(entry) => {
                if !entry.cancel.send_replace(true) {
                    info!(entry_id = id, task = %entry.name, "periodic task cancelled");
                }
                true
            }
            None => false,
        }
    }

    /// Cancel all entries and wait up to `grace` for in-flight runs.
    ///
    /// Runs still going when the grace period ends are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let mut handles = Vec::new();
        for mut entry in self.entries.iter_mut() {
            entry.cancel.send_replace(true);
            if let Some(handle) = entry.handle.take() {
                handles.push((*entry.key(), entry.name.clone(), handle));
            }
        }

        let deadline = Instant::now() + grace;
        for (id, name, mut handle) in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(entry_id = id, task = %name, "grace period elapsed, abandoning run");
                handle.abort();
            }
        }
        info!("periodic scheduler stopped");
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.cancel.send_replace(true);
        }
    }
}

async fn drive(
    id: EntryId,
    task: Arc<dyn PeriodicTask>,
    first_fire: Instant,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
    state: watch::Sender<EntryState>,
) {
    let mut next = first_fire;
    loop {
        if *cancel.borrow() {
            break;
        }
        state.send_replace(EntryState::Armed { next_fire_at: next });

        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep_until(next) => {}
        }

        // A cancel that lands together with the timer wins.
        if *cancel.borrow() {
            break;
        }

        let fired_at = Instant::now();
        next += period;
        state.send_replace(EntryState::Running);
        debug!(
            entry_id = id,
            task = task.name(),
            lag_ms = fired_at.saturating_duration_since(next - period).as_millis() as u64,
            "periodic task fired"
        );

        // Dropping the set aborts the run, which is how shutdown abandons it.
        let mut runs = JoinSet::new();
        let run = task.clone();
        runs.spawn(async move { run.run().await });
        if let Some(Err(e)) = runs.join_next().await {
            error!(
                entry_id = id,
                task = task.name(),
                panicked = e.is_panic(),
                "periodic task run failed: {e}"
            );
        }
    }
    state.send_replace(EntryState::Cancelled);
    debug!(entry_id = id, task = task.name(), "periodic task stopped");
}
