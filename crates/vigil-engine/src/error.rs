use std::time::Duration;

use vigil_core::errors::{DispatchError, ReasoningError};
use vigil_core::risk::{EntryViolation, RiskCategory};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no regional expert registered for {0:?}")]
    UnknownRegion(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dialogue between {initiator} and {recipient} produced no turns")]
    EmptyTranscript { initiator: String, recipient: String },

    #[error("dialogue session timed out after {0:?}")]
    SessionTimeout(Duration),

    #[error("risk matrix update rejected for {category}: {violation}")]
    Validation {
        category: RiskCategory,
        violation: EntryViolation,
    },

    #[error("alert dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("reasoning service error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("risk assessment carried no usable category scores: {0}")]
    UnparseableAssessment(String),

    #[error("request cancelled")]
    Cancelled,
}

impl EngineError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::UnknownRegion(_) => "unknown_region",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::EmptyTranscript { .. } => "empty_transcript",
            Self::SessionTimeout(_) => "session_timeout",
            Self::Validation { .. } => "validation",
            Self::Dispatch(_) => "dispatch",
            Self::Reasoning(_) => "reasoning",
            Self::UnparseableAssessment(_) => "unparseable_assessment",
            Self::Cancelled => "cancelled",
        }
    }
}
