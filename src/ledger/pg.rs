#![cfg(feature = "db")]
//! Postgres-backed run ledger.
//!
//! Schema (see `migrations/0001_forecast_runs.sql`):
//!
//! ```sql
//! CREATE TABLE forecast_runs (
//!     id            UUID PRIMARY KEY,
//!     seq           BIGSERIAL NOT NULL,
//!     site          TEXT NOT NULL,
//!     horizon       TEXT NOT NULL,
//!     window_start  TIMESTAMPTZ NOT NULL,
//!     window_end    TIMESTAMPTZ NOT NULL,
//!     reason        TEXT NOT NULL,
//!     state         TEXT NOT NULL,
//!     attempts      INT NOT NULL DEFAULT 0,
//!     created_at    TIMESTAMPTZ NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL,
//!     error_detail  TEXT
//! );
//! CREATE UNIQUE INDEX forecast_runs_one_active
//!     ON forecast_runs (site, horizon, window_start)
//!     WHERE state IN ('pending', 'running');
//! ```
//!
//! The partial unique index is the authoritative guard for the one
//! active run per window rule; the `SELECT ... FOR UPDATE` in `create`
//! exists to turn the violation into a typed conflict carrying the
//! existing run id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use super::RunLedger;
use crate::domain::{ForecastHorizon, RunId, RunKey, RunRecord, RunRequest, RunState, SiteKey, TargetWindow, TriggerReason};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    seq: i64,
    site: String,
    horizon: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    reason: String,
    state: String,
    attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error_detail: Option<String>,
}

impl RunRow {
    fn into_record(self) -> EngineResult<RunRecord> {
        let horizon = ForecastHorizon::from_str(&self.horizon)
            .map_err(|_| EngineError::Storage(format!("unknown horizon '{}'", self.horizon)))?;
        let state = RunState::from_str(&self.state)
            .map_err(|_| EngineError::Storage(format!("unknown run state '{}'", self.state)))?;
        let reason = TriggerReason::from_str(&self.reason)
            .map_err(|_| EngineError::Storage(format!("unknown trigger reason '{}'", self.reason)))?;
        Ok(RunRecord {
            id: self.id,
            seq: self.seq as u64,
            site: SiteKey::from(self.site),
            horizon,
            window: TargetWindow::new(self.window_start, self.window_end),
            reason,
            state,
            attempts: self.attempts as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
            error_detail: self.error_detail,
        })
    }
}

const RUN_COLUMNS: &str = "id, seq, site, horizon, window_start, window_end, reason, state, \
                           attempts, created_at, updated_at, error_detail";

pub struct PgRunLedger {
    pool: PgPool,
}

impl PgRunLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        id: RunId,
    ) -> EngineResult<RunRecord> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM forecast_runs WHERE id = $1 FOR UPDATE");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(storage_err)?;
        row.ok_or(EngineError::RunNotFound(id))?.into_record()
    }

    async fn apply_transition(
        tx: &mut Transaction<'_, Postgres>,
        record: &RunRecord,
        to: RunState,
        detail: Option<String>,
    ) -> EngineResult<RunRecord> {
        if !record.state.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                run_id: record.id,
                from: record.state,
                to,
            });
        }
        let attempts = if to == RunState::Running {
            record.attempts as i32 + 1
        } else {
            record.attempts as i32
        };
        let sql = format!(
            "UPDATE forecast_runs \
             SET state = $2, attempts = $3, updated_at = $4, \
                 error_detail = COALESCE($5, error_detail) \
             WHERE id = $1 \
             RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&sql)
            .bind(record.id)
            .bind(to.to_string())
            .bind(attempts)
            .bind(Utc::now())
            .bind(detail)
            .fetch_one(&mut **tx)
            .await
            .map_err(storage_err)?;
        row.into_record()
    }
}

fn storage_err(e: sqlx::Error) -> EngineError {
    EngineError::Storage(e.to_string())
}

#[async_trait]
impl RunLedger for PgRunLedger {
    async fn create(&self, request: &RunRequest) -> EngineResult<RunRecord> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM forecast_runs \
             WHERE site = $1 AND horizon = $2 AND window_start = $3 \
               AND state IN ('pending', 'running') \
             FOR UPDATE",
        )
        .bind(request.site.to_string())
        .bind(request.horizon.to_string())
        .bind(request.window.start)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;
        if let Some((id,)) = existing {
            return Err(EngineError::DuplicateRunConflict { existing: id });
        }

        let now = Utc::now();
        let sql = format!(
            "INSERT INTO forecast_runs \
                 (id, site, horizon, window_start, window_end, reason, state, attempts, \
                  created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $8) \
             RETURNING {RUN_COLUMNS}"
        );
        let row: RunRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(request.site.to_string())
            .bind(request.horizon.to_string())
            .bind(request.window.start)
            .bind(request.window.end)
            .bind(request.reason.to_string())
            .bind(RunState::Pending.to_string())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        row.into_record()
    }

    async fn transition(
        &self,
        id: RunId,
        to: RunState,
        detail: Option<String>,
    ) -> EngineResult<RunRecord> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let record = Self::lock_row(&mut tx, id).await?;
        let updated = Self::apply_transition(&mut tx, &record, to, detail).await?;
        tx.commit().await.map_err(storage_err)?;
        Ok(updated)
    }

    async fn retry(&self, id: RunId, max_attempts: u32) -> EngineResult<RunRecord> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let record = Self::lock_row(&mut tx, id).await?;
        if record.state != RunState::Failed {
            return Err(EngineError::InvalidTransition {
                run_id: id,
                from: record.state,
                to: RunState::Pending,
            });
        }
        // While this record sat in `Failed` the key was free; another
        // trigger may have claimed it. Reinstating `Pending` then would
        // put two active records on one window, so the old run ends here.
        let superseded: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM forecast_runs \
             WHERE site = $1 AND horizon = $2 AND window_start = $3 \
               AND id <> $4 AND state IN ('pending', 'running') \
             FOR UPDATE",
        )
        .bind(record.site.to_string())
        .bind(record.horizon.to_string())
        .bind(record.window.start)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let (next, detail) = if superseded.is_some() {
            (
                RunState::Exhausted,
                Some("window claimed by a newer run".to_string()),
            )
        } else if record.attempts < max_attempts {
            (RunState::Pending, None)
        } else {
            (RunState::Exhausted, None)
        };
        let updated = Self::apply_transition(&mut tx, &record, next, detail).await?;
        tx.commit().await.map_err(storage_err)?;
        Ok(updated)
    }

    async fn find_active(&self, key: &RunKey) -> EngineResult<Option<RunRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM forecast_runs \
             WHERE site = $1 AND horizon = $2 AND window_start = $3 \
               AND state IN ('pending', 'running')"
        );
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(key.site.to_string())
            .bind(key.horizon.to_string())
            .bind(key.window.start)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(RunRow::into_record).transpose()
    }

    async fn latest_for_window(&self, key: &RunKey) -> EngineResult<Option<RunRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM forecast_runs \
             WHERE site = $1 AND horizon = $2 AND window_start = $3 \
             ORDER BY seq DESC LIMIT 1"
        );
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(key.site.to_string())
            .bind(key.horizon.to_string())
            .bind(key.window.start)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(RunRow::into_record).transpose()
    }

    async fn get(&self, id: RunId) -> EngineResult<RunRecord> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM forecast_runs WHERE id = $1");
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.ok_or(EngineError::RunNotFound(id))?.into_record()
    }

    async fn history(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        limit: usize,
    ) -> EngineResult<Vec<RunRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM forecast_runs \
             WHERE site = $1 AND horizon = $2 \
             ORDER BY seq DESC LIMIT $3"
        );
        let rows: Vec<RunRow> = sqlx::query_as(&sql)
            .bind(site.to_string())
            .bind(horizon.to_string())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.into_iter().map(RunRow::into_record).collect()
    }
}
