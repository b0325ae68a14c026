//! Bundled reference model: turbine power-curve for wind sites, clear-sky
//! bell scaled by cloud cover for solar sites.

use async_trait::async_trait;
use chrono::Timelike;

use crate::domain::{ForecastPoint, Site, SiteKind, WeatherPoint};
use crate::error::EngineResult;

use super::ForecastModel;

pub struct PowerCurveModel {
    /// Wind speed (m/s) below which a turbine produces nothing.
    pub cut_in_ms: f64,
    /// Wind speed at which nameplate capacity is reached.
    pub rated_ms: f64,
    /// Storm shutdown speed.
    pub cut_out_ms: f64,
    /// Explicit (speed, capacity-fraction) curve; overrides the cubic ramp
    /// when non-empty. Must be sorted by speed.
    pub curve: Vec<(f64, f64)>,
    /// Solar day shape, hours UTC.
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
    /// Symmetric confidence band as a fraction of the estimate.
    pub confidence_band: f64,
}

impl Default for PowerCurveModel {
    fn default() -> Self {
        Self {
            cut_in_ms: 3.0,
            rated_ms: 12.0,
            cut_out_ms: 25.0,
            curve: Vec::new(),
            sunrise_hour: 6.0,
            sunset_hour: 18.0,
            confidence_band: 0.15,
        }
    }
}

impl PowerCurveModel {
    /// Capacity fraction produced at a given wind speed.
    fn wind_fraction(&self, wind_speed_ms: f64) -> f64 {
        if !self.curve.is_empty() {
            return interpolate_curve(&self.curve, wind_speed_ms);
        }

        if wind_speed_ms < self.cut_in_ms || wind_speed_ms > self.cut_out_ms {
            0.0
        } else if wind_speed_ms >= self.rated_ms {
            1.0
        } else {
            let x = (wind_speed_ms - self.cut_in_ms) / (self.rated_ms - self.cut_in_ms);
            x.powi(3)
        }
    }

    /// Capacity fraction for a solar site at a given time and cloud cover.
    fn solar_fraction(&self, hour: f64, cloud_cover_percent: f64) -> f64 {
        if hour < self.sunrise_hour || hour > self.sunset_hour {
            return 0.0;
        }
        let day_len = (self.sunset_hour - self.sunrise_hour).max(0.01);
        let x = (hour - self.sunrise_hour) / day_len;
        let clear_sky = (std::f64::consts::PI * x).sin().max(0.0);
        let cloud_factor = 1.0 - 0.7 * (cloud_cover_percent / 100.0).clamp(0.0, 1.0);
        clear_sky * cloud_factor
    }

    fn estimate(&self, site: &Site, point: &WeatherPoint) -> f64 {
        let fraction = match site.kind {
            SiteKind::Wind => self.wind_fraction(point.wind_speed_ms),
            SiteKind::Solar => {
                let hour =
                    point.timestamp.hour() as f64 + point.timestamp.minute() as f64 / 60.0;
                self.solar_fraction(hour, point.cloud_cover_percent)
            }
        };
        site.capacity_kw * fraction
    }
}

/// Linear interpolation over a sorted (speed, fraction) curve, clamped at
/// the ends.
fn interpolate_curve(curve: &[(f64, f64)], speed: f64) -> f64 {
    match curve.first() {
        None => return 0.0,
        Some(&(s, f)) if speed <= s => return f,
        _ => {}
    }
    let &(last_s, last_f) = curve.last().expect("curve checked non-empty");
    if speed >= last_s {
        return last_f;
    }
    for pair in curve.windows(2) {
        let (s0, f0) = pair[0];
        let (s1, f1) = pair[1];
        if speed >= s0 && speed <= s1 {
            let span = (s1 - s0).max(f64::EPSILON);
            return f0 + (f1 - f0) * (speed - s0) / span;
        }
    }
    last_f
}

#[async_trait]
impl ForecastModel for PowerCurveModel {
    async fn predict(
        &self,
        site: &Site,
        weather: &[WeatherPoint],
    ) -> EngineResult<Vec<ForecastPoint>> {
        Ok(weather
            .iter()
            .map(|point| {
                let generation_kw = self.estimate(site, point);
                let band = generation_kw * self.confidence_band;
                ForecastPoint {
                    timestamp: point.timestamp,
                    generation_kw,
                    lower_kw: (generation_kw - band).max(0.0),
                    upper_kw: (generation_kw + band).min(site.capacity_kw),
                }
            })
            .collect())
    }
}
