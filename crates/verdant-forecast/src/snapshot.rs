use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;
use verdant_core::Period;

/// One forecast bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Carbon intensity or price, in the snapshot's unit.
    pub value: f64,
    /// Dense ordinal, 1 = cheapest / cleanest.
    pub rank: u32,
}

/// Immutable view of the latest forecast for one area.
///
/// Points are held in ascending rank order, so a linear scan filtered by
/// eligibility yields the cheapest eligible bucket first. A snapshot with no
/// points is a valid "no data" value, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastSnapshot {
    area_code: String,
    timezone: Option<String>,
    state: String,
    unit: String,
    points: Vec<ForecastPoint>,
    fetched_at: DateTime<Utc>,
}

impl ForecastSnapshot {
    pub fn new(
        area_code: impl Into<String>,
        timezone: Option<String>,
        state: impl Into<String>,
        unit: impl Into<String>,
        mut points: Vec<ForecastPoint>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        // Stable: equal ranks keep provider order.
        points.sort_by_key(|p| p.rank);
        Self {
            area_code: area_code.into(),
            timezone,
            state: state.into(),
            unit: unit.into(),
            points,
            fetched_at,
        }
    }

    /// The explicit "no data" snapshot.
    pub fn empty(area_code: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self::new(area_code, None, "NO_DATA", "", Vec::new(), fetched_at)
    }

    pub fn area_code(&self) -> &str {
        &self.area_code
    }

    pub fn timezone_name(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    /// Provider time zone, if present and recognised.
    pub fn timezone(&self) -> Option<Tz> {
        let name = self.timezone.as_deref()?;
        match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                warn!(area_code = %self.area_code, timezone = %name, "forecast carries unknown time zone");
                None
            }
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn points(&self) -> &[ForecastPoint] {
        &self.points
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when at least one bucket starting inside `period` has not begun
    /// before the current hour.
    pub fn has_data_for_period(&self, period: &Period, now: DateTime<Utc>) -> bool {
        self.eligible(period, now).next().is_some()
    }

    /// Start of the lowest-ranked bucket inside `period` that is not in an
    /// hour that already passed.
    pub fn least_expensive_instant(
        &self,
        period: &Period,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.eligible(period, now).next().map(|p| p.period_start)
    }

    fn eligible<'a>(
        &'a self,
        period: &'a Period,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a ForecastPoint> + 'a {
        let current_hour = truncate_to_hour(now);
        self.points
            .iter()
            .filter(move |p| period.contains(p.period_start) && p.period_start >= current_hour)
    }
}

pub fn truncate_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(Duration::hours(1))
        .unwrap_or(instant)
}

/// Single-writer, many-reader holder of the current snapshot.
///
/// `replace` swaps the whole `Arc` at once; `load` hands out the `Arc` that
/// was current at call time, so a reader keeps a consistent view even while
/// a refresh publishes a newer one.
#[derive(Clone)]
pub struct SnapshotCell {
    tx: Arc<watch::Sender<Arc<ForecastSnapshot>>>,
}

impl SnapshotCell {
    pub fn new(initial: ForecastSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn load(&self) -> Arc<ForecastSnapshot> {
        self.tx.borrow().clone()
    }

    /// Publish `snapshot`, returning the one it superseded.
    pub fn replace(&self, snapshot: ForecastSnapshot) -> Arc<ForecastSnapshot> {
        self.tx.send_replace(Arc::new(snapshot))
    }

    /// Receiver notified on every replacement (used by display surfaces).
    pub fn subscribe(&self) -> watch::Receiver<Arc<ForecastSnapshot>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    fn point(start: DateTime<Utc>, rank: u32) -> ForecastPoint {
        ForecastPoint {
            period_start: start,
            period_end: start + Duration::hours(1),
            value: rank as f64 * 10.0,
            rank,
        }
    }

    fn snapshot(points: Vec<ForecastPoint>) -> ForecastSnapshot {
        ForecastSnapshot::new(
            "BE",
            Some("Europe/Brussels".into()),
            "OK",
            "gCO2/kWh",
            points,
            utc(12, 0, 0),
        )
    }

    #[test]
    fn points_are_held_in_rank_order() {
        let s = snapshot(vec![point(utc(12, 15, 0), 3), point(utc(12, 13, 0), 1), point(utc(12, 14, 0), 2)]);
        let ranks: Vec<u32> = s.points().iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn least_expensive_prefers_rank_over_chronology() {
        let s = snapshot(vec![
            point(utc(12, 12, 0), 2),
            point(utc(12, 18, 0), 1),
            point(utc(12, 14, 0), 3),
        ]);
        let period = Period::between(utc(12, 11, 0), utc(12, 21, 0)).unwrap();
        assert_eq!(s.least_expensive_instant(&period, utc(12, 11, 30)), Some(utc(12, 18, 0)));
    }

    #[test]
    fn least_expensive_skips_points_outside_period() {
        let s = snapshot(vec![
            point(utc(12, 8, 0), 1),
            point(utc(12, 22, 0), 2),
            point(utc(12, 15, 0), 3),
        ]);
        let period = Period::between(utc(12, 11, 0), utc(12, 21, 0)).unwrap();
        assert_eq!(s.least_expensive_instant(&period, utc(12, 11, 0)), Some(utc(12, 15, 0)));
    }

    #[test]
    fn current_hour_bucket_is_still_eligible() {
        let s = snapshot(vec![point(utc(12, 11, 0), 1), point(utc(12, 10, 0), 2)]);
        let period = Period::between(utc(12, 9, 0), utc(12, 21, 0)).unwrap();
        // 11:45 truncates to 11:00, so the 11:00 bucket counts, 10:00 does not.
        assert_eq!(s.least_expensive_instant(&period, utc(12, 11, 45)), Some(utc(12, 11, 0)));
        let only_past = snapshot(vec![point(utc(12, 10, 0), 1)]);
        assert!(!only_past.has_data_for_period(&period, utc(12, 11, 45)));
    }

    #[test]
    fn never_returns_instant_before_window_or_current_hour() {
        let points: Vec<ForecastPoint> = (0..24).map(|h| point(utc(12, h, 0), 24 - h)).collect();
        let s = snapshot(points);
        let period = Period::between(utc(12, 6, 0), utc(12, 20, 0)).unwrap();
        for minute_of_day in (0..20 * 60).step_by(37) {
            let now = utc(12, 0, 0) + Duration::minutes(minute_of_day);
            if let Some(at) = s.least_expensive_instant(&period, now) {
                assert!(at >= period.from());
                assert!(at >= truncate_to_hour(now));
                let best = s
                    .points()
                    .iter()
                    .filter(|p| period.contains(p.period_start) && p.period_start >= truncate_to_hour(now))
                    .map(|p| p.rank)
                    .min();
                let chosen = s.points().iter().find(|p| p.period_start == at).map(|p| p.rank);
                assert_eq!(chosen, best);
            }
        }
    }

    #[test]
    fn empty_snapshot_has_no_data() {
        let s = ForecastSnapshot::empty("BE", utc(12, 0, 0));
        let period = Period::between(utc(12, 11, 0), utc(12, 21, 0)).unwrap();
        assert!(s.is_empty());
        assert!(s.timezone().is_none());
        assert!(!s.has_data_for_period(&period, utc(12, 11, 0)));
        assert_eq!(s.least_expensive_instant(&period, utc(12, 11, 0)), None);
    }

    #[test]
    fn unknown_timezone_is_ignored() {
        let s = ForecastSnapshot::new("BE", Some("Nowhere/Special".into()), "OK", "", vec![], utc(12, 0, 0));
        assert!(s.timezone().is_none());
        assert_eq!(s.timezone_name(), Some("Nowhere/Special"));
    }

    #[test]
    fn cell_replace_returns_previous() {
        let cell = SnapshotCell::new(ForecastSnapshot::empty("BE", utc(12, 0, 0)));
        let next = snapshot(vec![point(utc(12, 13, 0), 1)]);
        let old = cell.replace(next);
        assert!(old.is_empty());
        assert_eq!(cell.load().points().len(), 1);
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        // Snapshot "a" has 10 points of value 10, snapshot "b" 20 points of value 20.
        fn uniform(n: u32) -> ForecastSnapshot {
            let points = (0..n)
                .map(|i| ForecastPoint {
                    period_start: utc(12, 0, 0) + Duration::hours(i as i64),
                    period_end: utc(12, 1, 0) + Duration::hours(i as i64),
                    value: n as f64,
                    rank: i + 1,
                })
                .collect();
            ForecastSnapshot::new("BE", None, "OK", "", points, utc(12, 0, 0))
        }

        let cell = SnapshotCell::new(uniform(10));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        let s = cell.load();
                        let n = s.points().len();
                        assert!(n == 10 || n == 20);
                        assert!(s.points().iter().all(|p| p.value == n as f64));
                    }
                })
            })
            .collect();

        for i in 0..2_000 {
            cell.replace(if i % 2 == 0 { uniform(20) } else { uniform(10) });
        }
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        for r in readers {
            r.join().expect("reader observed a torn snapshot");
        }
    }
}
