use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use verdant_core::RandomSource;

/// Cadence of the forecast refresh once it has fired for the first time.
///
/// A fixed 24h grid on the monotonic clock: after a DST change the refresh
/// lands one local hour off its base hour until the daemon restarts and
/// [`daily_refresh_first_fire`] places it again.
pub const DAILY: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// First instant the daily forecast refresh should fire.
///
/// The fire time is `base_hour:00` local time in `zone` plus a uniformly
/// random offset in `[0, window_minutes)`, spreading a fleet of independent
/// schedulers over the window. If today's slot has already passed, the
/// same computation is made for tomorrow.
pub fn daily_refresh_first_fire(
    now: DateTime<Utc>,
    zone: Tz,
    base_hour: u8,
    window_minutes: u32,
    rng: &dyn RandomSource,
) -> DateTime<Utc> {
    let offset = Duration::seconds(rng.below(u64::from(window_minutes) * 60) as i64);
    let today = now.with_timezone(&zone).date_naive();

    let candidate = local_hour_on(zone, today, base_hour) + offset;
    if candidate > now {
        return candidate;
    }

    // Already past today; use the same slot tomorrow.
    let tomorrow = today.succ_opt().unwrap_or(today);
    local_hour_on(zone, tomorrow, base_hour) + offset
}

/// Time left until `fire_at`, zero if it is already due.
pub fn delay_until(now: DateTime<Utc>, fire_at: DateTime<Utc>) -> std::time::Duration {
    (fire_at - now).to_std().unwrap_or_default()
}

/// `hour:00` on `date` in `zone`, as UTC.
///
/// When a DST gap swallows that hour the next hour that exists is used.
fn local_hour_on(zone: Tz, date: NaiveDate, hour: u8) -> DateTime<Utc> {
    let hour = u32::from(hour.min(23));
    for h in hour..=23 {
        if let Some(local) = zone
            .with_ymd_and_hms(date.year(), date.month(), date.day(), h, 0, 0)
            .earliest()
        {
            return local.with_timezone(&Utc);
        }
    }
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN));
    Utc.from_utc_datetime(&naive)
}
