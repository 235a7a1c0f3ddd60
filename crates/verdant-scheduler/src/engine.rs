use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use verdant_core::{Clock, RandomSource, SystemClock, ThreadRandom, VerdantConfig};
use verdant_forecast::{ForecastClient, ForecastSnapshot, SnapshotCell};

use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::periodic::{EntryId, PeriodicScheduler, PeriodicTask};
use crate::policy::{CarbonAwarePolicy, Decision, NO_FORECAST_FALLBACK};
use crate::schedule::{daily_refresh_first_fire, delay_until, DAILY};
use crate::state::StateKind;
use crate::store::JobStore;

/// Counts from one evaluation pass over the awaiting jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub examined: usize,
    pub scheduled: usize,
    pub enqueued: usize,
    pub left_awaiting: usize,
    /// Decisions discarded because another writer saved the job first.
    pub conflicts: usize,
    pub errors: usize,
}

impl EvaluationReport {
    pub fn transitioned(&self) -> usize {
        self.scheduled + self.enqueued
    }
}

/// Runs the decision policy over every awaiting job and persists the result.
#[derive(Clone)]
pub struct DeferralEvaluator {
    store: Arc<dyn JobStore>,
    snapshots: SnapshotCell,
    clock: Arc<dyn Clock>,
    policy: CarbonAwarePolicy,
    batch_size: usize,
}

impl DeferralEvaluator {
    pub fn new(
        store: Arc<dyn JobStore>,
        snapshots: SnapshotCell,
        clock: Arc<dyn Clock>,
        policy: CarbonAwarePolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            snapshots,
            clock,
            policy,
            batch_size,
        }
    }

    /// One pass over every awaiting job, read `batch_size` at a time.
    ///
    /// A failure on one job is counted and logged; the pass goes on with the
    /// next job. Only failing to read a page aborts the pass.
    pub fn evaluate_once(&self) -> Result<EvaluationReport> {
        let snapshot = self.snapshots.load();
        let now = self.clock.now();

        let mut report = EvaluationReport::default();
        let mut cursor = None;
        loop {
            let page = self.store.list_awaiting(cursor.as_ref(), self.batch_size)?;
            for job in page.jobs {
                self.evaluate_job(job, &snapshot, now, &mut report);
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(report)
    }

    fn evaluate_job(
        &self,
        mut job: Job,
        snapshot: &ForecastSnapshot,
        now: DateTime<Utc>,
        report: &mut EvaluationReport,
    ) {
        report.examined += 1;

        let reason = match self.policy.evaluate(&mut job, snapshot, now) {
            Ok(Decision::Wait) => {
                report.left_awaiting += 1;
                return;
            }
            Ok(Decision::Transition { reason, .. }) => reason,
            Err(e) => {
                error!(job_id = %job.id(), code = e.code(), "job evaluation failed: {e}");
                report.errors += 1;
                return;
            }
        };

        match self.store.save(&mut job) {
            Ok(()) => {
                let to = job.state_kind();
                match to {
                    StateKind::Scheduled => report.scheduled += 1,
                    _ => report.enqueued += 1,
                }
                if reason == NO_FORECAST_FALLBACK {
                    warn!(job_id = %job.id(), to = %to, "no forecast data, committing job");
                }
                info!(job_id = %job.id(), name = %job.name(), to = %to, reason, "job transitioned");
            }
            Err(SchedulerError::ConcurrentModification { .. }) => {
                debug!(job_id = %job.id(), "job changed underneath us, retrying next tick");
                report.conflicts += 1;
            }
            Err(e) => {
                error!(job_id = %job.id(), code = e.code(), "failed to persist decision: {e}");
                report.errors += 1;
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for DeferralEvaluator {
    fn name(&self) -> &str {
        "deferral-evaluation"
    }

    async fn run(&self) {
        let evaluator = self.clone();
        match tokio::task::spawn_blocking(move || evaluator.evaluate_once()).await {
            Ok(Ok(report)) if report.examined > 0 => info!(
                examined = report.examined,
                scheduled = report.scheduled,
                enqueued = report.enqueued,
                left_awaiting = report.left_awaiting,
                conflicts = report.conflicts,
                errors = report.errors,
                "evaluation pass complete"
            ),
            Ok(Ok(_)) => debug!("evaluation pass found no awaiting jobs"),
            Ok(Err(e)) => error!(code = e.code(), "evaluation pass failed: {e}"),
            Err(e) => error!("evaluation pass panicked: {e}"),
        }
    }
}

/// Fetches the forecast and publishes it to the shared [`SnapshotCell`].
pub struct ForecastRefresher {
    client: ForecastClient,
    snapshots: SnapshotCell,
}

impl ForecastRefresher {
    pub fn new(client: ForecastClient, snapshots: SnapshotCell) -> Self {
        Self { client, snapshots }
    }

    /// Replace the snapshot with a fresh one. On failure the current
    /// snapshot stays published. Returns whether a new snapshot went out.
    pub async fn refresh(&self) -> bool {
        let area_code = self.client.area_code();
        if area_code.is_empty() {
            warn!("no area code configured, skipping forecast refresh");
            return false;
        }

        match self.client.try_fetch_latest().await {
            Ok(snapshot) => {
                let points = snapshot.points().len();
                let previous = self.snapshots.replace(snapshot);
                info!(
                    area_code = %area_code,
                    points,
                    previous_points = previous.points().len(),
                    "forecast snapshot replaced"
                );
                true
            }
            Err(e) => {
                let current = self.snapshots.load();
                warn!(
                    area_code = %area_code,
                    error = %e,
                    kept_fetched_at = %current.fetched_at(),
                    kept_points = current.points().len(),
                    "forecast refresh failed, keeping previous snapshot"
                );
                false
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for ForecastRefresher {
    fn name(&self) -> &str {
        "forecast-refresh"
    }

    async fn run(&self) {
        self.refresh().await;
    }
}

/// The running carbon-aware scheduler: a daily forecast refresh and a
/// frequent evaluation pass, both on one [`PeriodicScheduler`].
pub struct CarbonAwareEngine {
    scheduler: PeriodicScheduler,
    snapshots: SnapshotCell,
    evaluator: Arc<DeferralEvaluator>,
    refresh_entry: EntryId,
    evaluation_entry: EntryId,
    shutdown_grace: Duration,
}

impl CarbonAwareEngine {
    /// Start with the system clock, thread-local randomness and an HTTP
    /// client built from `config.forecast`.
    pub async fn start(config: &VerdantConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let client = ForecastClient::new(&config.forecast, clock.clone())?;
        Self::start_with(config, client, store, clock, Arc::new(ThreadRandom)).await
    }

    /// Start with explicit collaborators.
    ///
    /// Refreshes the forecast once before arming the periodic entries, so
    /// the first evaluation pass already sees data when the provider is up.
    pub async fn start_with(
        config: &VerdantConfig,
        client: ForecastClient,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        config.validate()?;
        let zone = config.forecast.reference_zone()?;
        let now = clock.now();

        let snapshots = SnapshotCell::new(ForecastSnapshot::empty(client.area_code(), now));
        let refresher = Arc::new(ForecastRefresher::new(client, snapshots.clone()));
        refresher.refresh().await;

        let evaluator = Arc::new(DeferralEvaluator::new(
            store,
            snapshots.clone(),
            clock.clone(),
            CarbonAwarePolicy::new(zone),
            config.scheduler.batch_size,
        ));

        let first_refresh = daily_refresh_first_fire(
            now,
            zone,
            config.scheduler.daily_refresh_base_hour,
            config.scheduler.daily_refresh_window_minutes,
            rng.as_ref(),
        );
        let scheduler = PeriodicScheduler::new();
        let refresh_entry =
            scheduler.schedule(refresher, delay_until(now, first_refresh), DAILY)?;
        let evaluation_entry = scheduler.schedule(
            evaluator.clone(),
            Duration::ZERO,
            config.scheduler.evaluation_poll_interval(),
        )?;

        info!(
            area_code = %config.forecast.area_code,
            reference_timezone = %zone,
            next_refresh = %first_refresh,
            poll_interval_ms = config.scheduler.evaluation_poll_interval_ms,
            "carbon-aware engine started"
        );

        Ok(Self {
            scheduler,
            snapshots,
            evaluator,
            refresh_entry,
            evaluation_entry,
            shutdown_grace: config.scheduler.shutdown_grace(),
        })
    }

    /// Read-only view of the current forecast, for display surfaces.
    pub fn snapshots(&self) -> &SnapshotCell {
        &self.snapshots
    }

    pub fn scheduler(&self) -> &PeriodicScheduler {
        &self.scheduler
    }

    pub fn evaluator(&self) -> &DeferralEvaluator {
        &self.evaluator
    }

    pub fn refresh_entry(&self) -> EntryId {
        self.refresh_entry
    }

    pub fn evaluation_entry(&self) -> EntryId {
        self.evaluation_entry
    }

    /// Stop both entries, giving in-flight runs the configured grace period.
    pub async fn shutdown(self) {
        info!("carbon-aware engine shutting down");
        self.scheduler.shutdown(self.shutdown_grace).await;
    }
}
