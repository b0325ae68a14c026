use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use gridcast::config::Config;
use gridcast::domain::SiteRegistry;
use gridcast::executor::RunExecutor;
use gridcast::facade::ForecastEngine;
use gridcast::feed::open_meteo::OpenMeteoFeed;
use gridcast::ledger::MemoryRunLedger;
use gridcast::model::power_curve::PowerCurveModel;
use gridcast::scheduler::Scheduler;
use gridcast::store::MemoryForecastStore;
use gridcast::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;
    if cfg.sites.is_empty() {
        anyhow::bail!("no sites configured; add [[sites]] entries to config/default.toml");
    }

    let registry = Arc::new(SiteRegistry::new(cfg.sites.clone()));
    info!(
        sites = registry.len(),
        active = registry.active_sites().count(),
        "loaded site registry"
    );

    let ledger = Arc::new(MemoryRunLedger::new());
    let store = Arc::new(MemoryForecastStore::new());
    let feed = Arc::new(OpenMeteoFeed::new(&cfg.weather));
    let model = Arc::new(PowerCurveModel::default());

    let executor = Arc::new(RunExecutor::new(
        ledger.clone(),
        store.clone(),
        feed,
        model,
        registry.clone(),
        cfg.engine.clone(),
    ));
    let engine = Arc::new(ForecastEngine::new(
        ledger,
        store,
        executor,
        registry,
        cfg.scheduler.clone(),
    ));

    info!("starting gridcast forecast engine");
    Arc::new(Scheduler::new(engine)).start();

    telemetry::shutdown_signal().await;
    warn!("shutdown complete");
    Ok(())
}
