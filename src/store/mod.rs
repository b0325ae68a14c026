//! Forecast Store & Cache: append-only forecast versions plus a per-window
//! latest-valid pointer.
//!
//! Writes for different windows never contend; the pointer for a window
//! only advances, ordered by the producing run's ledger sequence, so a
//! late-completing earlier run can never clobber a newer result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ForecastHorizon, Freshness, GenerationForecast, SiteKey, TargetWindow,
};
use crate::error::EngineResult;

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::MemoryForecastStore;

/// Result of a store lookup: the latest valid forecast, if any, tagged
/// with its freshness against the horizon TTL.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit {
        forecast: GenerationForecast,
        freshness: Freshness,
    },
    Miss,
}

impl Lookup {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Append a forecast version and advance the window's latest pointer
    /// if this run supersedes the current one. Atomic per window key.
    async fn put(&self, forecast: GenerationForecast) -> EngineResult<()>;

    /// Latest valid forecast for an exact window, freshness-evaluated at
    /// `now` with the given TTL.
    async fn get(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        window: TargetWindow,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Lookup>;

    /// Latest valid forecast for the most recent window of a site/horizon.
    async fn latest(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Lookup>;

    /// Number of retained versions for a window (audit surface).
    async fn version_count(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        window: TargetWindow,
    ) -> EngineResult<usize>;
}

/// Freshness of a forecast computed at `computed_at` under `ttl`, seen at `now`.
pub fn freshness_at(
    computed_at: DateTime<Utc>,
    ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> Freshness {
    if now <= computed_at + ttl {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn freshness_boundary_is_inclusive() {
        let computed = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();
        let ttl = Duration::minutes(15);
        assert_eq!(freshness_at(computed, ttl, computed), Freshness::Fresh);
        assert_eq!(
            freshness_at(computed, ttl, computed + ttl),
            Freshness::Fresh
        );
        assert_eq!(
            freshness_at(computed, ttl, computed + ttl + Duration::seconds(1)),
            Freshness::Stale
        );
    }
}
