//! In-process ledger backing the default (non-`db`) build.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{ForecastHorizon, RunId, RunKey, RunRecord, RunRequest, RunState, SiteKey};
use crate::error::{EngineError, EngineResult};

use super::RunLedger;

#[derive(Default)]
struct Inner {
    next_seq: u64,
    records: HashMap<RunId, RunRecord>,
    /// Insertion-ordered run ids per window key.
    by_key: HashMap<RunKey, Vec<RunId>>,
}

/// Mutex-serialized ledger; every mutation happens under one lock, which
/// is what makes `create` atomic with respect to the active-run check.
#[derive(Default)]
pub struct MemoryRunLedger {
    inner: Mutex<Inner>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create(&self, request: &RunRequest) -> EngineResult<RunRecord> {
        let mut inner = self.inner.lock();
        let key = request.key();

        if let Some(ids) = inner.by_key.get(&key) {
            for id in ids {
                if let Some(existing) = inner.records.get(id) {
                    if existing.state.is_active() {
                        return Err(EngineError::DuplicateRunConflict { existing: existing.id });
                    }
                }
            }
        }

        inner.next_seq += 1;
        let now = Utc::now();
        let record = RunRecord {
            id: Uuid::new_v4(),
            seq: inner.next_seq,
            site: request.site.clone(),
            horizon: request.horizon,
            window: request.window,
            reason: request.reason,
            state: RunState::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            error_detail: None,
        };
        inner.by_key.entry(key).or_default().push(record.id);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn transition(
        &self,
        id: RunId,
        to: RunState,
        detail: Option<String>,
    ) -> EngineResult<RunRecord> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(EngineError::RunNotFound(id))?;

        if !record.state.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                run_id: id,
                from: record.state,
                to,
            });
        }

        record.state = to;
        record.updated_at = Utc::now();
        if to == RunState::Running {
            record.attempts += 1;
        }
        if detail.is_some() {
            record.error_detail = detail;
        }
        Ok(record.clone())
    }

    async fn retry(&self, id: RunId, max_attempts: u32) -> EngineResult<RunRecord> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .get(&id)
            .ok_or(EngineError::RunNotFound(id))?;

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
        let key = record.key();
        let attempts = record.attempts;
        let superseded = inner.by_key.get(&key).is_some_and(|ids| {
            ids.iter()
                .filter(|other| **other != id)
                .filter_map(|other| inner.records.get(other))
                .any(|r| r.state.is_active())
        });

        let next = if superseded || attempts >= max_attempts {
            RunState::Exhausted
        } else {
            RunState::Pending
        };
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(EngineError::RunNotFound(id))?;
        record.state = next;
        if superseded && record.error_detail.is_none() {
            record.error_detail = Some("window claimed by a newer run".to_string());
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn find_active(&self, key: &RunKey) -> EngineResult<Option<RunRecord>> {
        let inner = self.inner.lock();
        let Some(ids) = inner.by_key.get(key) else {
            return Ok(None);
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.records.get(id))
            .find(|r| r.state.is_active())
            .cloned())
    }

    async fn latest_for_window(&self, key: &RunKey) -> EngineResult<Option<RunRecord>> {
        let inner = self.inner.lock();
        let Some(ids) = inner.by_key.get(key) else {
            return Ok(None);
        };
        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| inner.records.get(id))
            .next()
            .cloned())
    }

    async fn get(&self, id: RunId) -> EngineResult<RunRecord> {
        let inner = self.inner.lock();
        inner
            .records
            .get(&id)
            .cloned()
            .ok_or(EngineError::RunNotFound(id))
    }

    async fn history(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        limit: usize,
    ) -> EngineResult<Vec<RunRecord>> {
        let inner = self.inner.lock();
        let mut records: Vec<RunRecord> = inner
            .records
            .values()
            .filter(|r| &r.site == site && r.horizon == horizon)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.seq.cmp(&a.seq));
        records.truncate(limit);
        Ok(records)
    }
}
