use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ForecastHorizon, SiteKey, TargetWindow};

/// Single weather observation or forecast point from the feed adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    /// Wind speed at hub height (m/s); the feed falls back to 10 m speed
    /// when hub-height data is missing.
    pub wind_speed_ms: f64,
    pub wind_direction_deg: Option<f64>,
    pub cloud_cover_percent: f64,
    pub pressure_hpa: Option<f64>,
}

/// One estimated generation value inside a forecast window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub generation_kw: f64,
    /// Lower/upper confidence bounds (kW).
    pub lower_kw: f64,
    pub upper_kw: f64,
}

/// Aggregate weather context carried alongside a forecast for audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub mean_wind_speed_ms: Option<f64>,
    pub mean_temperature_c: Option<f64>,
    pub mean_cloud_cover_percent: Option<f64>,
}

impl WeatherSummary {
    pub fn from_points(points: &[WeatherPoint]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let n = points.len() as f64;
        Self {
            mean_wind_speed_ms: Some(points.iter().map(|p| p.wind_speed_ms).sum::<f64>() / n),
            mean_temperature_c: Some(points.iter().map(|p| p.temperature_c).sum::<f64>() / n),
            mean_cloud_cover_percent: Some(
                points.iter().map(|p| p.cloud_cover_percent).sum::<f64>() / n,
            ),
        }
    }
}

/// Immutable forecast version produced by exactly one run.
///
/// A new run writes a new version; prior versions are retained for audit
/// while the store tracks the latest valid one per window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationForecast {
    pub site: SiteKey,
    pub horizon: ForecastHorizon,
    pub window: TargetWindow,
    pub points: Vec<ForecastPoint>,
    pub weather: WeatherSummary,
    pub computed_at: DateTime<Utc>,
    pub run_id: Uuid,
    /// Ledger sequence of the producing run; the store's ordering anchor.
    pub run_seq: u64,
}

impl GenerationForecast {
    /// Total forecast energy over the window (kWh).
    pub fn total_energy_kwh(&self) -> f64 {
        let step_hours = self.horizon.resolution().num_seconds() as f64 / 3600.0;
        self.points.iter().map(|p| p.generation_kw * step_hours).sum()
    }

    pub fn peak_generation_kw(&self) -> Option<f64> {
        self.points
            .iter()
            .map(|p| p.generation_kw)
            .max_by(|a, b| a.partial_cmp(b).expect("generation values are finite"))
    }
}

/// Freshness of a served forecast against its horizon TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Statistics reported after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub site: SiteKey,
    pub horizon: ForecastHorizon,
    pub window: TargetWindow,
    pub points_written: usize,
    pub total_energy_kwh: f64,
}
