//! Periodic forecast scheduler.
//!
//! One long-lived task per horizon. On each tick the scheduler sweeps
//! every active site: the current calendar window gets a run when its
//! cached forecast is missing or stale, and a bounded tail of past
//! windows is backfilled when they carry no forecast at all. Windows
//! with a run in flight, or abandoned as exhausted, are skipped. A
//! duplicate dispatch is not an error here; another trigger simply got
//! there first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, error, info};

use crate::domain::{ForecastHorizon, RunKey, RunRequest, RunState, Site, TargetWindow, TriggerReason};
use crate::error::{EngineError, EngineResult};
use crate::facade::ForecastEngine;
use crate::store::Lookup;

/// Per-horizon sweep counters, mirrored for all three horizons.
#[derive(Debug, Clone, Default)]
pub struct SweepStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub dispatched_total: u64,
}

pub struct Scheduler {
    engine: Arc<ForecastEngine>,
    hourly_status: Arc<RwLock<SweepStatus>>,
    daily_status: Arc<RwLock<SweepStatus>>,
    weekly_status: Arc<RwLock<SweepStatus>>,
}

impl Scheduler {
    pub fn new(engine: Arc<ForecastEngine>) -> Self {
        Self {
            engine,
            hourly_status: Arc::new(RwLock::new(SweepStatus::default())),
            daily_status: Arc::new(RwLock::new(SweepStatus::default())),
            weekly_status: Arc::new(RwLock::new(SweepStatus::default())),
        }
    }

    /// Spawn one sweep loop per horizon.
    pub fn start(self: Arc<Self>) {
        for horizon in ForecastHorizon::ALL {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_sweep_loop(horizon).await;
            });
        }
        info!("forecast sweep loops started");
    }

    fn status_for(&self, horizon: ForecastHorizon) -> &Arc<RwLock<SweepStatus>> {
        match horizon {
            ForecastHorizon::Hourly => &self.hourly_status,
            ForecastHorizon::Daily => &self.daily_status,
            ForecastHorizon::Weekly => &self.weekly_status,
        }
    }

    pub async fn status(&self, horizon: ForecastHorizon) -> SweepStatus {
        self.status_for(horizon).read().await.clone()
    }

    async fn run_sweep_loop(&self, horizon: ForecastHorizon) {
        // Spread the three loops out so their first sweeps do not hit
        // the weather feed at the same instant.
        let jitter = rand::thread_rng().gen_range(0..2000);
        sleep(Duration::from_millis(jitter)).await;

        let mut interval = interval(horizon.tick_interval());
        loop {
            interval.tick().await;

            let now = Utc::now();
            {
                let mut status = self.status_for(horizon).write().await;
                status.last_run = Some(now);
                status.run_count += 1;
            }

            match self.sweep(horizon, now).await {
                Ok(dispatched) => {
                    let mut status = self.status_for(horizon).write().await;
                    status.last_success = Some(now);
                    status.success_count += 1;
                    status.last_error = None;
                    status.dispatched_total += dispatched as u64;
                    if dispatched > 0 {
                        info!(horizon = %horizon, dispatched, "sweep dispatched runs");
                    }
                }
                Err(e) => {
                    let mut status = self.status_for(horizon).write().await;
                    status.error_count += 1;
                    status.last_error = Some(e.to_string());
                    error!(horizon = %horizon, error = %e, "sweep failed");
                }
            }
        }
    }

    /// One pass over all active sites for a horizon. Returns the number
    /// of runs dispatched.
    pub async fn sweep(&self, horizon: ForecastHorizon, now: DateTime<Utc>) -> EngineResult<usize> {
        let sites: Vec<Site> = self.engine.registry().active_sites().cloned().collect();
        let lookback = self.engine.scheduler_config().policy(horizon).backfill_windows;

        let mut dispatched = 0;
        for site in &sites {
            for (window, reason) in sweep_targets(horizon, now, lookback) {
                if self.wants_run(site, horizon, window, reason, now).await? {
                    let request = RunRequest::new(site.key.clone(), horizon, window, reason);
                    match self.engine.dispatch(request).await {
                        Ok(record) => {
                            dispatched += 1;
                            debug!(run_id = %record.id, window = %window, reason = %reason, "sweep dispatch");
                        }
                        Err(EngineError::DuplicateRunConflict { existing }) => {
                            debug!(run_id = %existing, window = %window, "run already in flight");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(dispatched)
    }

    /// Whether a window needs a run right now.
    ///
    /// The current window is refreshed whenever its cache entry is
    /// missing or stale; backfill windows only when they have no
    /// forecast at all. Exhausted windows are left alone until an
    /// operator intervenes.
    async fn wants_run(
        &self,
        site: &Site,
        horizon: ForecastHorizon,
        window: TargetWindow,
        reason: TriggerReason,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let key = RunKey {
            site: site.key.clone(),
            horizon,
            window,
        };
        if let Some(last) = self.engine.latest_record_for(&key).await? {
            if last.state == RunState::Exhausted || last.state.is_active() {
                return Ok(false);
            }
        }

        let ttl = self.engine.scheduler_config().ttl(horizon);
        let lookup = self
            .engine
            .store()
            .get(&site.key, horizon, window, ttl, now)
            .await?;
        let needed = match (reason, lookup) {
            (_, Lookup::Miss) => true,
            (TriggerReason::Scheduled, Lookup::Hit { freshness, .. }) => {
                freshness == crate::domain::Freshness::Stale
            }
            // Backfill fills gaps; any existing version satisfies it.
            (_, Lookup::Hit { .. }) => false,
        };
        Ok(needed)
    }
}

/// Windows a sweep at `now` considers: the current window, then up to
/// `lookback` completed windows behind it, oldest last.
pub(crate) fn sweep_targets(
    horizon: ForecastHorizon,
    now: DateTime<Utc>,
    lookback: u32,
) -> Vec<(TargetWindow, TriggerReason)> {
    let mut targets = vec![(horizon.window_containing(now), TriggerReason::Scheduled)];
    for steps in 1..=lookback {
        targets.push((horizon.window_before(now, steps), TriggerReason::Backfill));
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SchedulerConfig};
    use crate::domain::{
        ForecastPoint, GenerationForecast, RunId, SiteKey, SiteKind, SiteRegistry, SiteStatus,
        WeatherPoint,
    };
    use crate::executor::RunExecutor;
    use crate::feed::MockWeatherFeed;
    use crate::ledger::MemoryRunLedger;
    use crate::model::MockForecastModel;
    use crate::store::{ForecastStore, MemoryForecastStore};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn test_site() -> Site {
        Site {
            key: SiteKey::from("S1"),
            name: "North Ridge".into(),
            kind: SiteKind::Wind,
            capacity_kw: 2000.0,
            latitude: 57.7,
            longitude: 11.9,
            unit_count: 4,
            status: SiteStatus::Active,
        }
    }

    fn weather_points(window: TargetWindow) -> Vec<WeatherPoint> {
        let step = window.duration() / 60;
        (0..60)
            .map(|i| WeatherPoint {
                timestamp: window.start + step * i,
                temperature_c: 8.0,
                wind_speed_ms: 9.0,
                wind_direction_deg: Some(220.0),
                cloud_cover_percent: 40.0,
                pressure_hpa: Some(1010.0),
            })
            .collect()
    }

    fn estimates_for(weather: &[WeatherPoint]) -> Vec<ForecastPoint> {
        weather
            .iter()
            .map(|p| ForecastPoint {
                timestamp: p.timestamp,
                generation_kw: 800.0,
                lower_kw: 700.0,
                upper_kw: 900.0,
            })
            .collect()
    }

    struct Harness {
        store: Arc<MemoryForecastStore>,
        engine: Arc<ForecastEngine>,
        scheduler: Scheduler,
    }

    fn harness() -> Harness {
        let mut feed = MockWeatherFeed::new();
        feed.expect_fetch()
            .returning(move |_, _, w| Ok(weather_points(w)));
        let mut model = MockForecastModel::new();
        model
            .expect_predict()
            .returning(|_, w| Ok(estimates_for(w)));

        let ledger: Arc<MemoryRunLedger> = Arc::new(MemoryRunLedger::new());
        let store: Arc<MemoryForecastStore> = Arc::new(MemoryForecastStore::new());
        let registry = Arc::new(SiteRegistry::new(vec![test_site()]));
        let executor = Arc::new(RunExecutor::new(
            ledger.clone(),
            store.clone(),
            Arc::new(feed),
            Arc::new(model),
            registry.clone(),
            EngineConfig {
                max_attempts: 3,
                call_timeout_secs: 5,
                retry_backoff_ms: 1,
            },
        ));
        let engine = Arc::new(ForecastEngine::new(
            ledger,
            store.clone(),
            executor,
            registry,
            SchedulerConfig::default(),
        ));
        let scheduler = Scheduler::new(engine.clone());
        Harness {
            store,
            engine,
            scheduler,
        }
    }

    fn seeded_forecast(window: TargetWindow, computed_at: DateTime<Utc>) -> GenerationForecast {
        GenerationForecast {
            site: SiteKey::from("S1"),
            horizon: ForecastHorizon::Hourly,
            window,
            weather: Default::default(),
            points: estimates_for(&weather_points(window)),
            computed_at,
            run_id: RunId::new_v4(),
            run_seq: 1,
        }
    }

    #[test]
    fn sweep_targets_cover_current_and_lookback_windows() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();
        let targets = sweep_targets(ForecastHorizon::Hourly, now, 6);
        assert_eq!(targets.len(), 7);
        assert_eq!(targets[0].1, TriggerReason::Scheduled);
        assert_eq!(
            targets[0].0.start,
            Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap()
        );
        assert!(targets[1..]
            .iter()
            .all(|(_, reason)| *reason == TriggerReason::Backfill));
        assert_eq!(
            targets[6].0.start,
            Utc.with_ymd_and_hms(2026, 3, 14, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn weekly_sweep_looks_back_one_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();
        let targets = sweep_targets(ForecastHorizon::Weekly, now, 1);
        assert_eq!(targets.len(), 2);
        // ISO week containing 2026-03-14 starts Monday 2026-03-09.
        assert_eq!(
            targets[0].0.start,
            Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap()
        );
        assert_eq!(
            targets[1].0.start,
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn first_sweep_dispatches_current_plus_backfill() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();

        let dispatched = h.scheduler.sweep(ForecastHorizon::Hourly, now).await.unwrap();
        // Default hourly policy: current window plus 6 backfill windows.
        assert_eq!(dispatched, 7);
    }

    #[tokio::test]
    async fn sweep_is_idempotent_while_runs_are_in_flight() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();

        h.scheduler.sweep(ForecastHorizon::Hourly, now).await.unwrap();
        let second = h.scheduler.sweep(ForecastHorizon::Hourly, now).await.unwrap();
        assert_eq!(second, 0, "all windows already have active runs");
    }

    #[tokio::test]
    async fn backfilled_window_is_not_refilled_even_when_stale() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();
        let past = ForecastHorizon::Hourly.window_before(now, 2);

        // An old forecast exists for the past window, well past its TTL.
        h.store
            .put(seeded_forecast(past, past.start))
            .await
            .unwrap();

        let dispatched = h.scheduler.sweep(ForecastHorizon::Hourly, now).await.unwrap();
        // 7 targets minus the one already covered.
        assert_eq!(dispatched, 6);
    }

    #[tokio::test]
    async fn stale_current_window_is_rescheduled() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();
        let current = ForecastHorizon::Hourly.window_containing(now);

        // Forecast computed 20 minutes ago, hourly TTL is 15 minutes.
        h.store
            .put(seeded_forecast(current, now - ChronoDuration::minutes(20)))
            .await
            .unwrap();
        // Backfill windows already filled.
        for steps in 1..=6 {
            let w = ForecastHorizon::Hourly.window_before(now, steps);
            h.store.put(seeded_forecast(w, w.start)).await.unwrap();
        }

        let dispatched = h.scheduler.sweep(ForecastHorizon::Hourly, now).await.unwrap();
        assert_eq!(dispatched, 1, "only the stale current window reruns");
    }

    #[tokio::test]
    async fn exhausted_window_is_left_alone() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 30, 0).unwrap();
        let current = ForecastHorizon::Hourly.window_containing(now);

        let record = h
            .engine
            .trigger_manual(&SiteKey::from("S1"), ForecastHorizon::Hourly, current)
            .await
            .unwrap();
        h.engine
            .force_exhaust(record.id, "operator abort")
            .await
            .unwrap();

        // Fill everything else so the exhausted window is the only gap.
        for steps in 1..=6 {
            let w = ForecastHorizon::Hourly.window_before(now, steps);
            h.store.put(seeded_forecast(w, w.start)).await.unwrap();
        }

        let dispatched = h.scheduler.sweep(ForecastHorizon::Hourly, now).await.unwrap();
        assert_eq!(dispatched, 0, "exhausted windows need operator action");
    }
}
