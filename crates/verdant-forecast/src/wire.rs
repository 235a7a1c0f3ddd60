//! JSON shape returned by the forecast provider.
//!
//! Two flavours share one document layout: carbon intensity
//! (`intensityForecast[].value`) and day-ahead prices
//! (`hourlyEnergyPrices[].price`). Both decode into the same types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::{ForecastPoint, ForecastSnapshot};

/// Forecast buckets are hourly unless the provider says otherwise.
const DEFAULT_BUCKET_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub area_code: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default, rename = "intensityForecast", alias = "hourlyEnergyPrices")]
    pub points: Vec<WirePoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePoint {
    pub period_start_at: DateTime<Utc>,
    #[serde(default)]
    pub period_end_at: Option<DateTime<Utc>>,
    #[serde(alias = "price")]
    pub value: f64,
    pub rank: u32,
}

impl ForecastResponse {
    /// Convert into an immutable snapshot stamped with `fetched_at`.
    pub fn into_snapshot(self, fetched_at: DateTime<Utc>) -> ForecastSnapshot {
        let points = self
            .points
            .into_iter()
            .map(|p| ForecastPoint {
                period_start: p.period_start_at,
                period_end: p
                    .period_end_at
                    .unwrap_or(p.period_start_at + Duration::minutes(DEFAULT_BUCKET_MINUTES)),
                value: p.value,
                rank: p.rank,
            })
            .collect();

        ForecastSnapshot::new(
            self.area_code,
            self.timezone,
            self.state,
            self.unit,
            points,
            fetched_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decodes_intensity_document() {
        let json = r#"{
            "areaCode": "BE",
            "state": "OK",
            "unit": "gCO2/kWh",
            "timezone": "Europe/Brussels",
            "intensityForecast": [
                {"periodStartAt": "2024-03-12T14:00:00Z", "value": 80.5, "rank": 1},
                {"periodStartAt": "2024-03-12T12:00:00Z", "value": 120.0, "rank": 2}
            ]
        }"#;
        let resp: ForecastResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.points.len(), 2);
        assert_eq!(resp.timezone.as_deref(), Some("Europe/Brussels"));

        let fetched = Utc.with_ymd_and_hms(2024, 3, 12, 10, 0, 0).unwrap();
        let snapshot = resp.into_snapshot(fetched);
        let first = &snapshot.points()[0];
        assert_eq!(first.rank, 1);
        assert_eq!(first.period_end - first.period_start, Duration::hours(1));
    }

    #[test]
    fn decodes_price_document_with_null_timezone() {
        let json = r#"{
            "areaCode": "DE",
            "state": "OK",
            "unit": "EUR/MWh",
            "timezone": null,
            "hourlyEnergyPrices": [
                {"periodStartAt": "2024-03-12T02:00:00Z", "periodEndAt": "2024-03-12T02:15:00Z", "price": 12.4, "rank": 1}
            ]
        }"#;
        let resp: ForecastResponse = serde_json::from_str(json).unwrap();
        assert!(resp.timezone.is_none());
        assert_eq!(resp.points[0].value, 12.4);
        let end = resp.points[0].period_end_at.unwrap();
        assert_eq!(end - resp.points[0].period_start_at, Duration::minutes(15));
    }

    #[test]
    fn missing_points_decode_as_empty() {
        let json = r#"{"areaCode": "BE", "state": "NO_DATA", "unit": "", "timezone": null}"#;
        let resp: ForecastResponse = serde_json::from_str(json).unwrap();
        assert!(resp.points.is_empty());
    }
}
