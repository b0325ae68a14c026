//! Run Ledger: durable record of every forecast-run attempt.
//!
//! The ledger is the single serialization point of the engine. All
//! concurrency control hangs off its atomic `create`/`transition`
//! operations keyed by (site, horizon, window); no lock is ever held
//! across a weather-feed or model call.

use async_trait::async_trait;

use crate::domain::{ForecastHorizon, RunId, RunKey, RunRecord, RunRequest, RunState, SiteKey};
use crate::error::EngineResult;

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::MemoryRunLedger;

#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Record a new pending run for the request's window key.
    ///
    /// Fails with `DuplicateRunConflict` if a pending or running record
    /// already holds the key; the conflict carries the existing run id so
    /// the caller can attach to it.
    async fn create(&self, request: &RunRequest) -> EngineResult<RunRecord>;

    /// Apply a state transition, enforcing the run state machine.
    ///
    /// A transition to `Running` starts a new attempt and increments the
    /// attempt count; a transition to `Failed` stores the error detail.
    async fn transition(
        &self,
        id: RunId,
        to: RunState,
        detail: Option<String>,
    ) -> EngineResult<RunRecord>;

    /// Move a `Failed` run back to `Pending` while attempts remain, or to
    /// `Exhausted` once the cap is reached. If another pending or running
    /// record has claimed the window in the meantime, the run resolves to
    /// `Exhausted` regardless of attempts. Returns the updated record.
    async fn retry(&self, id: RunId, max_attempts: u32) -> EngineResult<RunRecord>;

    /// The pending or running record holding this window key, if any.
    async fn find_active(&self, key: &RunKey) -> EngineResult<Option<RunRecord>>;

    /// Most recently created record for this window key, terminal or not.
    async fn latest_for_window(&self, key: &RunKey) -> EngineResult<Option<RunRecord>>;

    async fn get(&self, id: RunId) -> EngineResult<RunRecord>;

    /// Run history for a site/horizon, newest first.
    async fn history(
        &self,
        site: &SiteKey,
        horizon: ForecastHorizon,
        limit: usize,
    ) -> EngineResult<Vec<RunRecord>>;

    /// Operator override: mark a stuck run exhausted to free its window.
    async fn force_exhaust(&self, id: RunId, detail: String) -> EngineResult<RunRecord> {
        self.transition(id, RunState::Exhausted, Some(detail)).await
    }
}
