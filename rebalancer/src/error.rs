use thiserror::Error;

/// Failure taxonomy for the rebalancing engine.
///
/// `InvalidRange` and `ExecutionFailure` abort the current position's
/// workflow only. `UpstreamUnavailable` during KPI computation degrades the
/// affected metrics instead of aborting. `ParseError` from the advisor path
/// falls back to the heuristic strategy.
#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("insufficient {token} balance: need {needed}, have {available}")]
    InsufficientBalance {
        token: String,
        needed: f64,
        available: f64,
    },

    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    #[error("malformed collaborator payload: {0}")]
    ParseError(String),
}

impl From<serde_json::Error> for RebalanceError {
    fn from(err: serde_json::Error) -> Self {
        RebalanceError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for RebalanceError {
    fn from(err: reqwest::Error) -> Self {
        RebalanceError::UpstreamUnavailable(err.to_string())
    }
}
