//! Weather Feed Adapter boundary.
//!
//! The engine treats weather as a capability: `fetch` returns the ordered
//! points covering a target window, or fails. An empty sequence and a
//! provider failure are handled identically by the executor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ForecastHorizon, Site, TargetWindow, WeatherPoint};
use crate::error::EngineResult;

pub mod open_meteo;

pub use open_meteo::OpenMeteoFeed;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherFeed: Send + Sync {
    /// Ordered weather points covering `window` at the horizon's
    /// resolution.
    async fn fetch(
        &self,
        site: &Site,
        horizon: ForecastHorizon,
        window: TargetWindow,
    ) -> EngineResult<Vec<WeatherPoint>>;
}

/// Resample a coarse weather series onto a window's point grid by linear
/// interpolation, clamping to the nearest sample outside the series.
pub fn resample(
    series: &[WeatherPoint],
    window: TargetWindow,
    resolution: chrono::Duration,
) -> Vec<WeatherPoint> {
    if series.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut t = window.start;
    while t < window.end {
        out.push(sample_at(series, t));
        t += resolution;
    }
    out
}

fn sample_at(series: &[WeatherPoint], t: DateTime<Utc>) -> WeatherPoint {
    let pos = series.partition_point(|p| p.timestamp <= t);
    let (before, after) = match (pos.checked_sub(1).and_then(|i| series.get(i)), series.get(pos)) {
        (Some(b), Some(a)) => (b, a),
        (Some(b), None) => return clone_at(b, t),
        (None, Some(a)) => return clone_at(a, t),
        (None, None) => unreachable!("series checked non-empty"),
    };

    let span = (after.timestamp - before.timestamp).num_seconds() as f64;
    if span <= 0.0 {
        return clone_at(before, t);
    }
    let w = (t - before.timestamp).num_seconds() as f64 / span;
    let lerp = |a: f64, b: f64| a + (b - a) * w;

    WeatherPoint {
        timestamp: t,
        temperature_c: lerp(before.temperature_c, after.temperature_c),
        wind_speed_ms: lerp(before.wind_speed_ms, after.wind_speed_ms),
        wind_direction_deg: before.wind_direction_deg,
        cloud_cover_percent: lerp(before.cloud_cover_percent, after.cloud_cover_percent),
        pressure_hpa: before.pressure_hpa,
    }
}

fn clone_at(p: &WeatherPoint, t: DateTime<Utc>) -> WeatherPoint {
    let mut out = p.clone();
    out.timestamp = t;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn wp(minute: u32, wind: f64) -> WeatherPoint {
        WeatherPoint {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 14, 10, minute, 0).unwrap(),
            temperature_c: 10.0,
            wind_speed_ms: wind,
            wind_direction_deg: Some(200.0),
            cloud_cover_percent: 50.0,
            pressure_hpa: Some(1013.0),
        }
    }

    #[test]
    fn resample_fills_the_whole_window() {
        let window = ForecastHorizon::Hourly
            .window_containing(Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap());
        let series = vec![wp(0, 4.0), wp(30, 8.0)];
        let points = resample(&series, window, Duration::minutes(1));
        assert_eq!(points.len(), 60);
        assert_eq!(points[0].wind_speed_ms, 4.0);
        // Midpoint of the 0..30 segment.
        assert!((points[15].wind_speed_ms - 6.0).abs() < 1e-9);
        // Past the last sample: clamped.
        assert_eq!(points[59].wind_speed_ms, 8.0);
    }

    #[test]
    fn resample_of_empty_series_is_empty() {
        let window = ForecastHorizon::Hourly
            .window_containing(Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap());
        assert!(resample(&[], window, Duration::minutes(1)).is_empty());
    }

    #[test]
    fn resample_timestamps_are_strictly_increasing() {
        let window = ForecastHorizon::Daily
            .window_containing(Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap());
        let series = vec![wp(0, 4.0), wp(30, 8.0)];
        let points = resample(&series, window, Duration::hours(1));
        assert_eq!(points.len(), 24);
        for pair in points.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }
}
