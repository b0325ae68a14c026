//! Open-Meteo weather feed adapter.
//!
//! Fetches the hourly series covering a target window and resamples it to
//! the horizon's point grid. Only the adapter knows the provider wire
//! format; everything downstream sees `WeatherPoint`s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WeatherConfig;
use crate::domain::{ForecastHorizon, Site, TargetWindow, WeatherPoint};
use crate::error::{EngineError, EngineResult};

use super::{resample, WeatherFeed};

const HOURLY_VARS: &str =
    "temperature_2m,wind_speed_10m,wind_speed_100m,wind_direction_10m,cloud_cover,pressure_msl";

pub struct OpenMeteoFeed {
    client: Client,
    base_url: String,
}

impl OpenMeteoFeed {
    pub fn new(config: &WeatherConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.http_timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn forecast_url(&self, site: &Site, window: TargetWindow) -> String {
        format!(
            "{}/forecast?latitude={:.6}&longitude={:.6}&hourly={}&wind_speed_unit=ms&timeformat=unixtime&start_date={}&end_date={}",
            self.base_url,
            site.latitude,
            site.longitude,
            HOURLY_VARS,
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d"),
        )
    }
}

#[async_trait]
impl WeatherFeed for OpenMeteoFeed {
    async fn fetch(
        &self,
        site: &Site,
        horizon: ForecastHorizon,
        window: TargetWindow,
    ) -> EngineResult<Vec<WeatherPoint>> {
        let url = self.forecast_url(site, window);
        debug!(site = %site.key, %window, "fetching open-meteo forecast");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::InputDataUnavailable(format!("open-meteo request: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::InputDataUnavailable(format!(
                "open-meteo status {}",
                response.status()
            )));
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InputDataUnavailable(format!("open-meteo body: {e}")))?;

        let series = body.hourly.into_points(window);
        if series.is_empty() {
            warn!(site = %site.key, %window, "open-meteo returned no usable points");
            return Err(EngineError::InputDataUnavailable(
                "empty weather series for window".to_string(),
            ));
        }

        Ok(resample(&series, window, horizon.resolution()))
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: HourlyBlock,
}

#[derive(Debug, Default, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    time: Vec<i64>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_100m: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    pressure_msl: Vec<Option<f64>>,
}

impl HourlyBlock {
    /// Keep samples relevant to the window, padded one sample on each side
    /// so interpolation at the window edges has neighbors.
    fn into_points(self, window: TargetWindow) -> Vec<WeatherPoint> {
        let margin = chrono::Duration::hours(1);
        let mut points = Vec::new();
        for (i, unix) in self.time.iter().enumerate() {
            let Some(ts) = DateTime::<Utc>::from_timestamp(*unix, 0) else {
                continue;
            };
            if ts < window.start - margin || ts >= window.end + margin {
                continue;
            }

            // Hub-height wind when available, 10 m speed otherwise.
            let wind = value_at(&self.wind_speed_100m, i)
                .or_else(|| value_at(&self.wind_speed_10m, i));
            let Some(wind_speed_ms) = wind else { continue };

            points.push(WeatherPoint {
                timestamp: ts,
                temperature_c: value_at(&self.temperature_2m, i).unwrap_or(15.0),
                wind_speed_ms,
                wind_direction_deg: value_at(&self.wind_direction_10m, i),
                cloud_cover_percent: value_at(&self.cloud_cover, i).unwrap_or(50.0),
                pressure_hpa: value_at(&self.pressure_msl, i),
            });
        }
        points.sort_by_key(|p| p.timestamp);
        points
    }
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}
