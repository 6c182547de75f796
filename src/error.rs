use thiserror::Error;

pub type Result<T> = std::result::Result<T, InsightError>;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("insufficient data: need at least {needed} qualifying rows, found {found}")]
    InsufficientData { needed: usize, found: usize },

    #[error("feature width mismatch: scaler fitted on {expected} features, got {found}")]
    FeatureShapeMismatch { expected: usize, found: usize },

    #[error("statistic is undefined for the given sample")]
    DegenerateStatistic,

    #[error("invalid score record: {0}")]
    InvalidRecord(String),

    #[error("malformed model: {0}")]
    MalformedModel(String),

    #[error("model snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InsightError {
    /// Errors that the inference path absorbs by switching to a heuristic.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            InsightError::InsufficientData { .. }
                | InsightError::FeatureShapeMismatch { .. }
                | InsightError::DegenerateStatistic
        )
    }
}
