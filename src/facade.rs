//! Serving facade: the read path and the run dispatch path.
//!
//! Readers never wait on a model run. A fresh cached forecast is served
//! as-is; a stale one is served immediately while a refresh run is
//! dispatched in the background; a miss dispatches a run and reports
//! that nothing is available yet. The ledger's single-active-run rule
//! keeps a burst of identical queries from fanning out into duplicate
//! model work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::domain::{
    ForecastHorizon, Freshness, GenerationForecast, RunId, RunKey, RunRecord, RunRequest,
    RunState, SiteKey, SiteRegistry, TargetWindow, TriggerReason,
};
use crate::error::{EngineError, EngineResult};
use crate::executor::RunExecutor;
use crate::ledger::RunLedger;
use crate::store::{ForecastStore, Lookup};

pub struct ForecastEngine {
    ledger: Arc<dyn RunLedger>,
    store: Arc<dyn ForecastStore>,
    executor: Arc<RunExecutor>,
    registry: Arc<SiteRegistry>,
    scheduler_config: SchedulerConfig,
}

impl ForecastEngine {
    pub fn new(
        ledger: Arc<dyn RunLedger>,
        store: Arc<dyn ForecastStore>,
        executor: Arc<RunExecutor>,
        registry: Arc<SiteRegistry>,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            executor,
            registry,
            scheduler_config,
        }
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.scheduler_config
    }

    pub fn store(&self) -> &Arc<dyn ForecastStore> {
        &self.store
    }

    /// Newest ledger record for a window, if any run was ever created.
    pub async fn latest_record_for(&self, key: &RunKey) -> EngineResult<Option<RunRecord>> {
        self.ledger.latest_for_window(key).await
    }

    /// Create a run for the request and drive it in the background.
    ///
    /// The ledger entry is created before this returns, so the
    /// single-active-run guarantee holds from the caller's point of
    /// view; the pipeline itself runs on a spawned task.
    pub async fn dispatch(&self, request: RunRequest) -> EngineResult<RunRecord> {
        if self.registry.get(&request.site).is_none() {
            return Err(EngineError::UnknownSite(request.site.clone()));
        }
        let record = self.ledger.create(&request).await?;
        info!(
            run_id = %record.id,
            site = %record.site,
            horizon = %record.horizon,
            window = %record.window,
            reason = %record.reason,
            "dispatched forecast run"
        );
        let executor = self.executor.clone();
        let spawned = record.clone();
        tokio::spawn(async move {
            // Failures are recorded in the ledger and logged by the
            // executor; the dispatch task has nothing left to do with them.
            if let Err(error) = executor.run_to_completion(spawned).await {
                debug!(%error, "background run ended in error");
            }
        });
        Ok(record)
    }

    /// Dispatch, treating an already-active run for the same window as done.
    ///
    /// Exhausted windows are skipped: once the attempt cap is spent,
    /// only an operator (or a fresh manual trigger) restarts work there.
    async fn dispatch_if_idle(&self, request: RunRequest) -> EngineResult<()> {
        if let Some(last) = self.ledger.latest_for_window(&request.key()).await? {
            if last.state == RunState::Exhausted {
                debug!(run_id = %last.id, window = %request.window, "window exhausted, not redispatching");
                return Ok(());
            }
        }
        match self.dispatch(request).await {
            Ok(_) => Ok(()),
            Err(EngineError::DuplicateRunConflict { existing }) => {
                debug!(run_id = %existing, "refresh already in flight");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Forecast for an exact window, stale-while-revalidate.
    pub async fn query(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        window: TargetWindow,
        now: DateTime<Utc>,
    ) -> EngineResult<(GenerationForecast, Freshness)> {
        if self.registry.get(site).is_none() {
            return Err(EngineError::UnknownSite(site.clone()));
        }
        let ttl = self.scheduler_config.ttl(horizon);
        match self.store.get(site, horizon, window, ttl, now).await? {
            Lookup::Hit {
                forecast,
                freshness: Freshness::Fresh,
            } => Ok((forecast, Freshness::Fresh)),
            Lookup::Hit {
                forecast,
                freshness: Freshness::Stale,
            } => {
                // The stale copy is still the answer; a refresh that
                // cannot be dispatched must not turn the read into an error.
                if let Err(error) = self
                    .dispatch_if_idle(RunRequest::new(
                        site.clone(),
                        horizon,
                        window,
                        TriggerReason::CacheMiss,
                    ))
                    .await
                {
                    warn!(%site, %horizon, %window, %error, "refresh dispatch failed, serving stale");
                }
                Ok((forecast, Freshness::Stale))
            }
            Lookup::Miss => {
                self.dispatch_if_idle(RunRequest::new(
                    site.clone(),
                    horizon,
                    window,
                    TriggerReason::CacheMiss,
                ))
                .await?;
                Err(EngineError::NoForecastAvailable {
                    site: site.clone(),
                    horizon,
                })
            }
        }
    }

    /// Most recent window with any forecast for the site and horizon.
    pub async fn latest(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        now: DateTime<Utc>,
    ) -> EngineResult<(GenerationForecast, Freshness)> {
        if self.registry.get(site).is_none() {
            return Err(EngineError::UnknownSite(site.clone()));
        }
        let ttl = self.scheduler_config.ttl(horizon);
        match self.store.latest(site, horizon, ttl, now).await? {
            Lookup::Hit { forecast, freshness } => {
                if freshness == Freshness::Stale {
                    if let Err(error) = self
                        .dispatch_if_idle(RunRequest::new(
                            site.clone(),
                            horizon,
                            forecast.window,
                            TriggerReason::CacheMiss,
                        ))
                        .await
                    {
                        warn!(%site, %horizon, %error, "refresh dispatch failed, serving stale");
                    }
                }
                Ok((forecast, freshness))
            }
            Lookup::Miss => {
                // Nothing stored yet for any window: start filling the
                // current one so a repeat call has something to serve.
                self.dispatch_if_idle(RunRequest::new(
                    site.clone(),
                    horizon,
                    horizon.window_containing(now),
                    TriggerReason::CacheMiss,
                ))
                .await?;
                Err(EngineError::NoForecastAvailable {
                    site: site.clone(),
                    horizon,
                })
            }
        }
    }

    /// Operator-requested run for a specific window, bypassing freshness.
    pub async fn trigger_manual(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        window: TargetWindow,
    ) -> EngineResult<RunRecord> {
        self.dispatch(RunRequest::new(
            site.clone(),
            horizon,
            window,
            TriggerReason::Manual,
        ))
        .await
    }

    /// Recent run records for a site and horizon, newest first.
    pub async fn run_history(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        limit: usize,
    ) -> EngineResult<Vec<RunRecord>> {
        self.ledger.history(site, horizon, limit).await
    }

    pub async fn run(&self, id: RunId) -> EngineResult<RunRecord> {
        self.ledger.get(id).await
    }

    /// Operator override: abandon a run regardless of its current state.
    pub async fn force_exhaust(&self, id: RunId, detail: impl Into<String>) -> EngineResult<RunRecord> {
        let record = self.ledger.force_exhaust(id, detail.into()).await?;
        info!(run_id = %record.id, window = %record.window, "run exhausted by operator");
        Ok(record)
    }
}
