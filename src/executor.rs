//! Run Executor: carries one RunRequest to completion or failure.
//!
//! One `attempt` is a single pass of the pipeline: mark running, fetch
//! weather, invoke the model, validate, write the forecast, mark
//! succeeded. `run_to_completion` wraps attempts in the bounded retry
//! loop; the ledger alone decides whether another attempt is allowed.
//! No lock is held across the feed or model calls, each of which is
//! bounded by the configured per-call timeout.

use chrono::Utc;
use itertools::Itertools;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::domain::{
    ForecastPoint, GenerationForecast, RunOutcome, RunRecord, RunState, Site, SiteRegistry,
    TargetWindow, WeatherSummary,
};
use crate::error::{EngineError, EngineResult};
use crate::feed::WeatherFeed;
use crate::ledger::RunLedger;
use crate::model::ForecastModel;
use crate::store::ForecastStore;

/// Tolerance above nameplate capacity before an estimate is implausible.
const CAPACITY_TOLERANCE: f64 = 0.01;

pub struct RunExecutor {
    ledger: Arc<dyn RunLedger>,
    store: Arc<dyn ForecastStore>,
    feed: Arc<dyn WeatherFeed>,
    model: Arc<dyn ForecastModel>,
    registry: Arc<SiteRegistry>,
    config: EngineConfig,
}

impl RunExecutor {
    pub fn new(
        ledger: Arc<dyn RunLedger>,
        store: Arc<dyn ForecastStore>,
        feed: Arc<dyn WeatherFeed>,
        model: Arc<dyn ForecastModel>,
        registry: Arc<SiteRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            feed,
            model,
            registry,
            config,
        }
    }

    /// Execute one attempt of the given pending run.
    ///
    /// On failure the record is left in `Failed` with the error detail;
    /// the caller decides about retries.
    pub async fn attempt(&self, record: &RunRecord) -> EngineResult<RunOutcome> {
        let record = self
            .ledger
            .transition(record.id, RunState::Running, None)
            .await?;

        match self.pipeline(&record).await {
            Ok(outcome) => {
                self.ledger
                    .transition(record.id, RunState::Succeeded, None)
                    .await?;
                info!(
                    run_id = %record.id,
                    site = %record.site,
                    horizon = %record.horizon,
                    window = %record.window,
                    points = outcome.points_written,
                    total_energy_kwh = outcome.total_energy_kwh,
                    "forecast run succeeded"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    run_id = %record.id,
                    site = %record.site,
                    window = %record.window,
                    attempt = record.attempts,
                    error = %e,
                    "forecast run attempt failed"
                );
                self.ledger
                    .transition(
                        record.id,
                        RunState::Failed,
                        Some(format!("{}: {e}", e.kind())),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Run attempts until the ledger reports success or exhaustion.
    pub async fn run_to_completion(&self, record: RunRecord) -> EngineResult<RunOutcome> {
        let run_id = record.id;
        let mut current = record;
        loop {
            match self.attempt(&current).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => {
                    let after = self.ledger.retry(run_id, self.config.max_attempts).await?;
                    match after.state {
                        RunState::Pending => {
                            tokio::time::sleep(self.config.retry_backoff()).await;
                            current = after;
                        }
                        RunState::Exhausted => {
                            warn!(run_id = %run_id, attempts = after.attempts, "run exhausted");
                            return Err(EngineError::RunExhausted {
                                run_id,
                                attempts: after.attempts,
                                detail: after
                                    .error_detail
                                    .unwrap_or_else(|| "no detail recorded".to_string()),
                            });
                        }
                        other => {
                            // A concurrent operator override may have moved the
                            // record; stop driving it.
                            warn!(run_id = %run_id, state = %other, "run left retry path");
                            return Err(EngineError::RunExhausted {
                                run_id,
                                attempts: after.attempts,
                                detail: format!("run moved to {other} outside retry path"),
                            });
                        }
                    }
                }
                Err(e) => {
                    // Non-retryable faults abandon the window immediately.
                    let record = self
                        .ledger
                        .force_exhaust(run_id, format!("{}: {e}", e.kind()))
                        .await?;
                    return Err(EngineError::RunExhausted {
                        run_id,
                        attempts: record.attempts,
                        detail: format!("{e}"),
                    });
                }
            }
        }
    }

    /// Steps 2-4 of a run: fetch, predict, validate, persist.
    async fn pipeline(&self, record: &RunRecord) -> EngineResult<RunOutcome> {
        let site = self
            .registry
            .get(&record.site)
            .ok_or_else(|| EngineError::UnknownSite(record.site.clone()))?;

        let weather = timeout(
            self.config.call_timeout(),
            self.feed.fetch(site, record.horizon, record.window),
        )
        .await
        .map_err(|_| EngineError::InputDataUnavailable("weather feed timed out".to_string()))??;

        if weather.is_empty() {
            return Err(EngineError::InputDataUnavailable(
                "weather feed returned no points".to_string(),
            ));
        }

        let points = timeout(
            self.config.call_timeout(),
            self.model.predict(site, &weather),
        )
        .await
        .map_err(|_| EngineError::ModelError("model call timed out".to_string()))??;

        validate_output(site, record.window, record.horizon.expected_points(), &points)?;

        let forecast = GenerationForecast {
            site: record.site.clone(),
            horizon: record.horizon,
            window: record.window,
            weather: WeatherSummary::from_points(&weather),
            points,
            computed_at: Utc::now(),
            run_id: record.id,
            run_seq: record.seq,
        };
        let outcome = RunOutcome {
            run_id: record.id,
            site: record.site.clone(),
            horizon: record.horizon,
            window: record.window,
            points_written: forecast.points.len(),
            total_energy_kwh: forecast.total_energy_kwh(),
        };

        self.store.put(forecast).await?;
        Ok(outcome)
    }
}

/// Shape and plausibility checks on model output.
///
/// Readers must only ever see fully validated forecasts, so everything is
/// checked before the store write: full window coverage, strictly
/// monotonic timestamps, physically plausible values for the site.
fn validate_output(
    site: &Site,
    window: TargetWindow,
    expected_points: usize,
    points: &[ForecastPoint],
) -> EngineResult<()> {
    if points.len() != expected_points {
        return Err(EngineError::ModelOutputInvalid(format!(
            "expected {expected_points} points for {window}, got {}",
            points.len()
        )));
    }

    if let Some(first) = points.first() {
        if first.timestamp != window.start {
            return Err(EngineError::ModelOutputInvalid(format!(
                "first point at {} does not open window {window}",
                first.timestamp
            )));
        }
    }

    for (a, b) in points.iter().tuple_windows() {
        if b.timestamp <= a.timestamp {
            return Err(EngineError::ModelOutputInvalid(format!(
                "non-monotonic timestamps at {}",
                b.timestamp
            )));
        }
    }

    let max_plausible = site.capacity_kw * (1.0 + CAPACITY_TOLERANCE);
    for p in points {
        if !window.contains(p.timestamp) {
            return Err(EngineError::ModelOutputInvalid(format!(
                "point at {} outside window {window}",
                p.timestamp
            )));
        }
        if !p.generation_kw.is_finite() || p.generation_kw < 0.0 || p.generation_kw > max_plausible
        {
            return Err(EngineError::ModelOutputInvalid(format!(
                "implausible generation {} kW at {} for capacity {} kW",
                p.generation_kw, p.timestamp, site.capacity_kw
            )));
        }
        if p.lower_kw > p.generation_kw || p.upper_kw < p.generation_kw {
            return Err(EngineError::ModelOutputInvalid(format!(
                "confidence bounds disordered at {}",
                p.timestamp
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ForecastHorizon, RunRequest, SiteKey, SiteKind, SiteStatus, TriggerReason, WeatherPoint,
    };
    use crate::feed::MockWeatherFeed;
    use crate::ledger::{MemoryRunLedger, RunLedger};
    use crate::model::MockForecastModel;
    use crate::store::{Lookup, MemoryForecastStore};
    use chrono::{Duration, TimeZone};

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

    fn window_at_ten() -> TargetWindow {
        ForecastHorizon::Hourly
            .window_containing(Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap())
    }

    fn weather_points(window: TargetWindow) -> Vec<WeatherPoint> {
        (0..60)
            .map(|m| WeatherPoint {
                timestamp: window.start + Duration::minutes(m),
                temperature_c: 8.0,
                wind_speed_ms: 9.0,
                wind_direction_deg: Some(220.0),
                cloud_cover_percent: 40.0,
                pressure_hpa: Some(1010.0),
            })
            .collect()
    }

    fn estimates(window: TargetWindow) -> Vec<ForecastPoint> {
        (0..60)
            .map(|m| ForecastPoint {
                timestamp: window.start + Duration::minutes(m),
                generation_kw: 800.0,
                lower_kw: 700.0,
                upper_kw: 900.0,
            })
            .collect()
    }

    struct Harness {
        ledger: Arc<MemoryRunLedger>,
        store: Arc<MemoryForecastStore>,
        executor: RunExecutor,
    }

    fn harness(feed: MockWeatherFeed, model: MockForecastModel) -> Harness {
        let ledger = Arc::new(MemoryRunLedger::new());
        let store = Arc::new(MemoryForecastStore::new());
        let config = EngineConfig {
            max_attempts: 3,
            call_timeout_secs: 5,
            retry_backoff_ms: 1,
        };
        let executor = RunExecutor::new(
            ledger.clone(),
            store.clone(),
            Arc::new(feed),
            Arc::new(model),
            Arc::new(SiteRegistry::new(vec![test_site()])),
            config,
        );
        Harness {
            ledger,
            store,
            executor,
        }
    }

    async fn pending_run(ledger: &MemoryRunLedger) -> RunRecord {
        ledger
            .create(&RunRequest::new(
                "S1",
                ForecastHorizon::Hourly,
                window_at_ten(),
                TriggerReason::Scheduled,
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn happy_path_writes_forecast_and_succeeds() {
        let window = window_at_ten();
        let mut feed = MockWeatherFeed::new();
        feed.expect_fetch()
            .times(1)
            .returning(move |_, _, w| Ok(weather_points(w)));
        let mut model = MockForecastModel::new();
        model
            .expect_predict()
            .times(1)
            .returning(|_, w| Ok(estimates_for(w)));

        let h = harness(feed, model);
        let run = pending_run(&h.ledger).await;
        let outcome = h.executor.run_to_completion(run.clone()).await.unwrap();
        assert_eq!(outcome.points_written, 60);

        let record = h.ledger.get(run.id).await.unwrap();
        assert_eq!(record.state, RunState::Succeeded);
        assert_eq!(record.attempts, 1);

        let now = Utc::now();
        match h
            .store
            .get(
                &SiteKey::from("S1"),
                ForecastHorizon::Hourly,
                window,
                Duration::minutes(15),
                now,
            )
            .await
            .unwrap()
        {
            Lookup::Hit { forecast, .. } => {
                assert_eq!(forecast.run_id, run.id);
                assert_eq!(forecast.points.len(), 60);
                assert_eq!(forecast.weather.mean_wind_speed_ms, Some(9.0));
            }
            Lookup::Miss => panic!("forecast missing from store"),
        }
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

    #[tokio::test]
    async fn empty_weather_exhausts_after_attempt_cap() {
        let mut feed = MockWeatherFeed::new();
        feed.expect_fetch().times(3).returning(|_, _, _| Ok(vec![]));
        let model = MockForecastModel::new();

        let h = harness(feed, model);
        let run = pending_run(&h.ledger).await;
        let err = h.executor.run_to_completion(run.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::RunExhausted { attempts: 3, .. }));

        let record = h.ledger.get(run.id).await.unwrap();
        assert_eq!(record.state, RunState::Exhausted);
        assert_eq!(record.attempts, 3);
        assert!(record
            .error_detail
            .as_deref()
            .unwrap()
            .contains("input_data_unavailable"));
    }

    #[tokio::test]
    async fn model_failing_twice_then_succeeding_shows_three_attempts() {
        let mut feed = MockWeatherFeed::new();
        feed.expect_fetch()
            .times(3)
            .returning(move |_, _, w| Ok(weather_points(w)));

        let mut model = MockForecastModel::new();
        let mut calls = 0u32;
        model.expect_predict().times(3).returning(move |_, w| {
            calls += 1;
            if calls < 3 {
                Err(EngineError::ModelError("model call timed out".into()))
            } else {
                Ok(estimates_for(w))
            }
        });

        let h = harness(feed, model);
        let run = pending_run(&h.ledger).await;
        h.executor.run_to_completion(run.clone()).await.unwrap();

        let record = h.ledger.get(run.id).await.unwrap();
        assert_eq!(record.state, RunState::Succeeded);
        assert_eq!(record.attempts, 3);

        // Exactly one forecast version was written.
        assert_eq!(
            h.store
                .version_count(&SiteKey::from("S1"), ForecastHorizon::Hourly, window_at_ten())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn invalid_model_output_is_retryable_and_recorded() {
        let mut feed = MockWeatherFeed::new();
        feed.expect_fetch()
            .times(1)
            .returning(move |_, _, w| Ok(weather_points(w)));
        let mut model = MockForecastModel::new();
        model
            .expect_predict()
            .times(1)
            .returning(|_, _| Ok(vec![])); // wrong point count

        let h = harness(feed, model);
        let run = pending_run(&h.ledger).await;
        let err = h.executor.attempt(&run).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelOutputInvalid(_)));

        let record = h.ledger.get(run.id).await.unwrap();
        assert_eq!(record.state, RunState::Failed);
        assert!(record
            .error_detail
            .as_deref()
            .unwrap()
            .contains("model_output_invalid"));
    }

    #[tokio::test]
    async fn unknown_site_abandons_the_run_without_retries() {
        let mut feed = MockWeatherFeed::new();
        feed.expect_fetch().never();
        let model = MockForecastModel::new();

        let h = harness(feed, model);
        let run = h
            .ledger
            .create(&RunRequest::new(
                "ghost",
                ForecastHorizon::Hourly,
                window_at_ten(),
                TriggerReason::Manual,
            ))
            .await
            .unwrap();

        let err = h.executor.run_to_completion(run.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::RunExhausted { .. }));
        let record = h.ledger.get(run.id).await.unwrap();
        assert_eq!(record.state, RunState::Exhausted);
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn validation_rejects_gap_and_disorder() {
        let site = test_site();
        let window = window_at_ten();
        let mut points = estimates(window);

        // Too few points.
        points.pop();
        assert!(validate_output(&site, window, 60, &points).is_err());

        // Disordered timestamps.
        let mut points = estimates(window);
        points.swap(10, 11);
        assert!(validate_output(&site, window, 60, &points).is_err());

        // First point must open the window.
        let mut points = estimates(window);
        points[0].timestamp = window.start + Duration::seconds(30);
        // Now 0 and 1 are still increasing, but coverage starts late.
        assert!(validate_output(&site, window, 60, &points).is_err());
    }

    #[test]
    fn validation_rejects_implausible_generation() {
        let site = test_site();
        let window = window_at_ten();

        let mut points = estimates(window);
        points[30].generation_kw = site.capacity_kw * 1.5;
        points[30].upper_kw = site.capacity_kw * 2.0;
        assert!(validate_output(&site, window, 60, &points).is_err());

        let mut points = estimates(window);
        points[5].generation_kw = -1.0;
        points[5].lower_kw = -2.0;
        assert!(validate_output(&site, window, 60, &points).is_err());

        let mut points = estimates(window);
        points[7].lower_kw = points[7].generation_kw + 1.0;
        assert!(validate_output(&site, window, 60, &points).is_err());
    }

    #[test]
    fn validation_accepts_a_full_plausible_window() {
        let site = test_site();
        let window = window_at_ten();
        assert!(validate_output(&site, window, 60, &estimates(window)).is_ok());
    }
}
