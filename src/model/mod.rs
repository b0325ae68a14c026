//! Forecast Model boundary.
//!
//! The mathematical model is pluggable: given weather points for a site,
//! produce generation estimates with confidence bounds. The engine only
//! cares about the contract; `PowerCurveModel` is the bundled default.

use async_trait::async_trait;

use crate::domain::{ForecastPoint, Site, WeatherPoint};
use crate::error::EngineResult;

pub mod power_curve;

pub use power_curve::PowerCurveModel;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastModel: Send + Sync {
    /// One estimate per input weather point, same order.
    async fn predict(
        &self,
        site: &Site,
        weather: &[WeatherPoint],
    ) -> EngineResult<Vec<ForecastPoint>>;
}
