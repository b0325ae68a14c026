#![cfg(feature = "db")]
//! Postgres-backed forecast store.
//!
//! Every run's output is appended as a version row; the served version
//! for a window is the one with the highest `run_seq`, so a slow run
//! from an older ledger entry can land late without clobbering newer
//! output. The forecast body travels as JSONB.
//!
//! Schema (see `migrations/0002_forecast_versions.sql`):
//!
//! ```sql
//! CREATE TABLE forecast_versions (
//!     id            BIGSERIAL PRIMARY KEY,
//!     site          TEXT NOT NULL,
//!     horizon       TEXT NOT NULL,
//!     window_start  TIMESTAMPTZ NOT NULL,
//!     run_seq       BIGINT NOT NULL,
//!     computed_at   TIMESTAMPTZ NOT NULL,
//!     payload       JSONB NOT NULL,
//!     UNIQUE (site, horizon, window_start, run_seq)
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use super::{freshness_at, ForecastStore, Lookup};
use crate::domain::{ForecastHorizon, GenerationForecast, SiteKey, TargetWindow};
use crate::error::{EngineError, EngineResult};

#[derive(sqlx::FromRow)]
struct VersionRow {
    computed_at: DateTime<Utc>,
    payload: Json<GenerationForecast>,
}

pub struct PgForecastStore {
    pool: PgPool,
}

impl PgForecastStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn hit(row: VersionRow, ttl: chrono::Duration, now: DateTime<Utc>) -> Lookup {
        Lookup::Hit {
            freshness: freshness_at(row.computed_at, ttl, now),
            forecast: row.payload.0,
        }
    }
}

fn storage_err(e: sqlx::Error) -> EngineError {
    EngineError::Storage(e.to_string())
}

#[async_trait]
impl ForecastStore for PgForecastStore {
    async fn put(&self, forecast: GenerationForecast) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO forecast_versions \
                 (site, horizon, window_start, run_seq, computed_at, payload) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (site, horizon, window_start, run_seq) DO NOTHING",
        )
        .bind(forecast.site.to_string())
        .bind(forecast.horizon.to_string())
        .bind(forecast.window.start)
        .bind(forecast.run_seq as i64)
        .bind(forecast.computed_at)
        .bind(Json(&forecast))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
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
        let row: Option<VersionRow> = sqlx::query_as(
            "SELECT computed_at, payload FROM forecast_versions \
             WHERE site = $1 AND horizon = $2 AND window_start = $3 \
             ORDER BY run_seq DESC LIMIT 1",
        )
        .bind(site.to_string())
        .bind(horizon.to_string())
        .bind(window.start)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.map_or(Lookup::Miss, |r| Self::hit(r, ttl, now)))
    }

    async fn latest(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Lookup> {
        let row: Option<VersionRow> = sqlx::query_as(
            "SELECT DISTINCT ON (window_start) computed_at, payload \
             FROM forecast_versions \
             WHERE site = $1 AND horizon = $2 \
             ORDER BY window_start DESC, run_seq DESC \
             LIMIT 1",
        )
        .bind(site.to_string())
        .bind(horizon.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.map_or(Lookup::Miss, |r| Self::hit(r, ttl, now)))
    }

    async fn version_count(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        window: TargetWindow,
    ) -> EngineResult<usize> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM forecast_versions \
             WHERE site = $1 AND horizon = $2 AND window_start = $3",
        )
        .bind(site.to_string())
        .bind(horizon.to_string())
        .bind(window.start)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ForecastPoint, RunId, WeatherSummary};
    use chrono::{Duration, TimeZone};

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgPool::connect(&url).await.expect("connect to postgres")
    }

    fn forecast(site: &str, run_seq: u64) -> GenerationForecast {
        let window = ForecastHorizon::Hourly
            .window_containing(Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap());
        GenerationForecast {
            site: SiteKey::from(site),
            horizon: ForecastHorizon::Hourly,
            window,
            weather: WeatherSummary::default(),
            points: vec![ForecastPoint {
                timestamp: window.start,
                generation_kw: 800.0,
                lower_kw: 700.0,
                upper_kw: 900.0,
            }],
            computed_at: Utc::now(),
            run_id: RunId::new_v4(),
            run_seq,
        }
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn later_seq_wins_regardless_of_write_order() {
        let store = PgForecastStore::new(pool().await);
        let site = format!("it-{}", RunId::new_v4());

        let newer = forecast(&site, 2);
        let older = forecast(&site, 1);
        let window = newer.window;
        let newer_id = newer.run_id;

        store.put(newer).await.unwrap();
        store.put(older).await.unwrap();

        match store
            .get(
                &SiteKey::from(site.as_str()),
                ForecastHorizon::Hourly,
                window,
                Duration::minutes(15),
                Utc::now(),
            )
            .await
            .unwrap()
        {
            Lookup::Hit { forecast, .. } => assert_eq!(forecast.run_id, newer_id),
            Lookup::Miss => panic!("expected a hit"),
        }
    }
}
