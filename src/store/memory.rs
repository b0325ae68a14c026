//! In-process forecast store backing the default (non-`db`) build.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::{ForecastHorizon, GenerationForecast, SiteKey, TargetWindow};
use crate::error::EngineResult;

use super::{freshness_at, ForecastStore, Lookup};

type WindowKey = (SiteKey, ForecastHorizon, TargetWindow);

#[derive(Default)]
struct Slot {
    /// All versions ever written for this window, append order.
    versions: Vec<GenerationForecast>,
    /// Index into `versions` of the latest valid forecast.
    latest: Option<usize>,
}

/// Reads never block on writes beyond the brief pointer swap; the slot map
/// is guarded by a single RwLock, per-window contention is write-only.
#[derive(Default)]
pub struct MemoryForecastStore {
    slots: RwLock<HashMap<WindowKey, Slot>>,
}

impl MemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup_slot(
        slot: &Slot,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Lookup {
        match slot.latest.and_then(|i| slot.versions.get(i)) {
            Some(forecast) => Lookup::Hit {
                forecast: forecast.clone(),
                freshness: freshness_at(forecast.computed_at, ttl, now),
            },
            None => Lookup::Miss,
        }
    }
}

#[async_trait]
impl ForecastStore for MemoryForecastStore {
    async fn put(&self, forecast: GenerationForecast) -> EngineResult<()> {
        let key = (forecast.site.clone(), forecast.horizon, forecast.window);
        let mut slots = self.slots.write();
        let slot = slots.entry(key).or_default();

        let supersedes = match slot.latest.and_then(|i| slot.versions.get(i)) {
            Some(current) => forecast.run_seq > current.run_seq,
            None => true,
        };

        slot.versions.push(forecast);
        if supersedes {
            slot.latest = Some(slot.versions.len() - 1);
        }
        Ok(())
    }

    async fn get(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        window: TargetWindow,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Lookup> {
        let slots = self.slots.read();
        Ok(slots
            .get(&(site.clone(), horizon, window))
            .map(|slot| Self::lookup_slot(slot, ttl, now))
            .unwrap_or(Lookup::Miss))
    }

    async fn latest(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Lookup> {
        let slots = self.slots.read();
        let newest = slots
            .iter()
            .filter(|((s, h, _), slot)| s == site && *h == horizon && slot.latest.is_some())
            .max_by_key(|((_, _, window), _)| window.start);
        Ok(newest
            .map(|(_, slot)| Self::lookup_slot(slot, ttl, now))
            .unwrap_or(Lookup::Miss))
    }

    async fn version_count(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        window: TargetWindow,
    ) -> EngineResult<usize> {
        let slots = self.slots.read();
        Ok(slots
            .get(&(site.clone(), horizon, window))
            .map(|slot| slot.versions.len())
            .unwrap_or(0))
    }
}
