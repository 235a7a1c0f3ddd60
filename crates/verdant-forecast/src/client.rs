use std::sync::Arc;

use tracing::{debug, error, info, warn};
use verdant_core::config::ForecastConfig;
use verdant_core::Clock;

use crate::error::{ForecastError, Result};
use crate::retry::{retry_if, RetryPolicy};
use crate::snapshot::ForecastSnapshot;
use crate::wire::ForecastResponse;

const FORECAST_PATH: &str = "/carbon-intensity/forecasts";
const CLIENT_ID_HEADER: &str = "x-client-id";
const CLIENT_ID: &str = concat!("verdant/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the forecast provider.
pub struct ForecastClient {
    client: reqwest::Client,
    base_url: String,
    area_code: String,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ForecastClient {
    /// Build a client with the configured connect and read timeouts.
    pub fn new(config: &ForecastConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .user_agent(CLIENT_ID)
            .build()?;

        Ok(Self::with_client(
            client,
            config.api_base_url.clone(),
            config.area_code.clone(),
            RetryPolicy::fixed(config.max_attempts, config.retry_backoff()),
            clock,
        ))
    }

    /// Use a caller-supplied `reqwest::Client` (tests point it at a mock server).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        area_code: impl Into<String>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            area_code: area_code.into(),
            retry,
            clock,
        }
    }

    pub fn area_code(&self) -> &str {
        &self.area_code
    }

    /// Fetch the latest forecast, degrading to an empty snapshot.
    ///
    /// Never fails: once every attempt is spent the error is logged and an
    /// explicit "no data" snapshot (no points, no time zone) is returned.
    pub async fn fetch_latest(&self) -> ForecastSnapshot {
        match self.try_fetch_latest().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    area_code = %self.area_code,
                    error = %e,
                    "forecast fetch failed after retries, returning empty snapshot"
                );
                ForecastSnapshot::empty(self.area_code.clone(), self.clock.now())
            }
        }
    }

    /// Fetch with retries, surfacing the last error.
    pub async fn try_fetch_latest(&self) -> Result<ForecastSnapshot> {
        let url = self.url()?;
        let snapshot = retry_if(self.retry, "forecast fetch", ForecastError::is_transient, |attempt| {
            self.fetch_once(&url, attempt)
        })
        .await?;
        info!(
            area_code = %snapshot.area_code(),
            points = snapshot.points().len(),
            state = %snapshot.state(),
            "forecast fetched"
        );
        Ok(snapshot)
    }

    async fn fetch_once(&self, url: &reqwest::Url, attempt: u32) -> Result<ForecastSnapshot> {
        debug!(%url, area_code = %self.area_code, attempt, "requesting forecast");

        let resp = self
            .client
            .get(url.clone())
            .query(&[("region", self.area_code.as_str())])
            .header(CLIENT_ID_HEADER, CLIENT_ID)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ForecastError::Unavailable(e.to_string())
                } else {
                    ForecastError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "forecast provider error");
            return Err(ForecastError::Api {
                status,
                message: text,
            });
        }

        let body: ForecastResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ForecastError::Unavailable(e.to_string())
            } else {
                ForecastError::Parse(e.to_string())
            }
        })?;

        Ok(body.into_snapshot(self.clock.now()))
    }

    fn url(&self) -> Result<reqwest::Url> {
        let raw = format!("{}{}", self.base_url.trim_end_matches('/'), FORECAST_PATH);
        reqwest::Url::parse(&raw).map_err(|e| ForecastError::InvalidUrl(format!("{raw}: {e}")))
    }
}
