//! gridcast: forecast scheduling and caching engine for renewable
//! generation sites.
//!
//! The engine keeps a cache of generation forecasts per site, horizon
//! and calendar-aligned target window. A run ledger serializes forecast
//! work so each window has at most one run in flight, a periodic
//! scheduler keeps current windows fresh and backfills recent gaps, and
//! the serving facade answers reads stale-while-revalidate.

pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod facade;
pub mod feed;
pub mod ledger;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use error::{EngineError, EngineResult};
pub use facade::ForecastEngine;
