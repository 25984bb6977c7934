use thiserror::Error;

use crate::types::SegmentId;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Validation error on field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Segment {0} not found")]
    NotFound(SegmentId),

    #[error("A build is already in progress for segment {0}")]
    BuildInProgress(SegmentId),

    #[error("Stale build for segment {segment_id}: built_at {attempted_ms} is not newer than stored {stored_ms}")]
    StaleBuild {
        segment_id: SegmentId,
        attempted_ms: i64,
        stored_ms: i64,
    },

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Evaluation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Materialization cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable code used in API error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::BuildInProgress(_) => "build_in_progress",
            Self::StaleBuild { .. } => "stale_build",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Config(_) => "config_error",
            Self::Cache(_) => "cache_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
