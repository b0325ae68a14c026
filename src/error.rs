use thiserror::Error;

use crate::domain::{ForecastHorizon, RunId, RunState, SiteKey};

/// Error taxonomy of the scheduling and caching engine.
///
/// `DuplicateRunConflict` is the idempotency signal, not a fault: callers
/// racing for the same window attach to the existing run instead of
/// starting another. The retryable variants drive the bounded retry loop;
/// everything else surfaces as-is.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Weather feed returned nothing usable for the target window.
    #[error("input data unavailable: {0}")]
    InputDataUnavailable(String),

    /// Model output failed shape/plausibility validation.
    #[error("model output invalid: {0}")]
    ModelOutputInvalid(String),

    /// The forecast model call itself failed or timed out.
    #[error("model error: {0}")]
    ModelError(String),

    /// A run is already pending or running for this window key.
    #[error("run {existing} already active for this window")]
    DuplicateRunConflict { existing: RunId },

    /// No forecast has ever been written for this site/horizon.
    #[error("no forecast available for site {site} horizon {horizon}")]
    NoForecastAvailable {
        site: SiteKey,
        horizon: ForecastHorizon,
    },

    /// The run burned through its attempt cap; operator attention needed.
    #[error("run {run_id} exhausted after {attempts} attempts: {detail}")]
    RunExhausted {
        run_id: RunId,
        attempts: u32,
        detail: String,
    },

    /// Ledger lookup by id found nothing.
    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// A transition the run state machine does not allow.
    #[error("invalid transition for run {run_id}: {from} -> {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunState,
        to: RunState,
    },

    /// Backend storage fault (ledger or forecast store).
    #[error("storage error: {0}")]
    Storage(String),

    /// Site key not present in the registry.
    #[error("unknown site: {0}")]
    UnknownSite(SiteKey),
}

impl EngineError {
    /// Whether the failure is worth another attempt within the retry cap.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InputDataUnavailable(_) | Self::ModelOutputInvalid(_) | Self::ModelError(_)
        )
    }

    /// Short stable tag for ledger error details and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputDataUnavailable(_) => "input_data_unavailable",
            Self::ModelOutputInvalid(_) => "model_output_invalid",
            Self::ModelError(_) => "model_error",
            Self::DuplicateRunConflict { .. } => "duplicate_run_conflict",
            Self::NoForecastAvailable { .. } => "no_forecast_available",
            Self::RunExhausted { .. } => "run_exhausted",
            Self::RunNotFound(_) => "run_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Storage(_) => "storage",
            Self::UnknownSite(_) => "unknown_site",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn retryable_classification_covers_upstream_faults() {
        assert!(EngineError::InputDataUnavailable("empty feed".into()).is_retryable());
        assert!(EngineError::ModelOutputInvalid("gap at 10:30".into()).is_retryable());
        assert!(EngineError::ModelError("timeout".into()).is_retryable());

        assert!(!EngineError::DuplicateRunConflict { existing: Uuid::new_v4() }.is_retryable());
        assert!(!EngineError::RunExhausted {
            run_id: Uuid::new_v4(),
            attempts: 3,
            detail: "feed down".into(),
        }
        .is_retryable());
        assert!(!EngineError::Storage("disk".into()).is_retryable());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(
            EngineError::ModelError("x".into()).kind(),
            "model_error"
        );
        assert_eq!(
            EngineError::DuplicateRunConflict { existing: Uuid::new_v4() }.kind(),
            "duplicate_run_conflict"
        );
    }
}
