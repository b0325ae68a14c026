use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{ForecastHorizon, SiteKey, TargetWindow};

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerReason {
    Scheduled,
    Backfill,
    Manual,
    CacheMiss,
}

/// One-shot request for a forecast run; consumed by the executor and not
/// persisted beyond the ledger entry it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub site: SiteKey,
    pub horizon: ForecastHorizon,
    pub window: TargetWindow,
    pub reason: TriggerReason,
}

impl RunRequest {
    pub fn new(
        site: impl Into<SiteKey>,
        horizon: ForecastHorizon,
        window: TargetWindow,
        reason: TriggerReason,
    ) -> Self {
        Self {
            site: site.into(),
            horizon,
            window,
            reason,
        }
    }

    pub fn key(&self) -> RunKey {
        RunKey {
            site: self.site.clone(),
            horizon: self.horizon,
            window: self.window,
        }
    }
}

/// The (site, horizon, window) identity a run is serialized on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub site: SiteKey,
    pub horizon: ForecastHorizon,
    pub window: TargetWindow,
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.site, self.horizon, self.window)
    }
}

/// Lifecycle state of a forecast run.
///
/// `Pending -> Running -> {Succeeded, Failed}`; a `Failed` record may move
/// back to `Pending` while attempts remain, after which it becomes
/// `Exhausted` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Exhausted,
}

impl RunState {
    /// States that hold the per-window concurrency slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }

    /// Legal next states under the run state machine.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, Self::Succeeded) | (Self::Running, Self::Failed) => true,
            (Self::Failed, Self::Pending) | (Self::Failed, Self::Exhausted) => true,
            // Operator override: unblock a stuck window.
            (Self::Pending, Self::Exhausted) | (Self::Running, Self::Exhausted) => true,
            _ => false,
        }
    }
}

/// Unique identifier of a run attempt chain.
pub type RunId = Uuid;

/// Ledger record of a forecast run attempt and its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    /// Ledger-assigned monotone sequence; orders runs for the same window
    /// independently of wall-clock completion order.
    pub seq: u64,
    pub site: SiteKey,
    pub horizon: ForecastHorizon,
    pub window: TargetWindow,
    pub reason: TriggerReason,
    pub state: RunState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_detail: Option<String>,
}

impl RunRecord {
    pub fn key(&self) -> RunKey {
        RunKey {
            site: self.site.clone(),
            horizon: self.horizon,
            window: self.window,
        }
    }
}
