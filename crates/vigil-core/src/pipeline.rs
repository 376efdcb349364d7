use std::fmt;

use serde::{Deserialize, Serialize};

/// States of one assessment run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    PatternAnalyzed,
    CulturallyContextualized,
    RiskAssessed,
    Alerted,
    Skipped,
    Complete,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::PatternAnalyzed => "pattern_analyzed",
            Self::CulturallyContextualized => "culturally_contextualized",
            Self::RiskAssessed => "risk_assessed",
            Self::Alerted => "alerted",
            Self::Skipped => "skipped",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `next` may directly follow `self`.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Complete | Failed, _) => false,
            (_, Failed) => true,
            (Received, PatternAnalyzed)
            | (PatternAnalyzed, CulturallyContextualized)
            | (CulturallyContextualized, RiskAssessed)
            | (RiskAssessed, Alerted | Skipped)
            | (Alerted | Skipped, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The dialogue-driven stages of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pattern,
    Cultural,
    Risk,
    Alert,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Cultural => "cultural",
            Self::Risk => "risk",
            Self::Alert => "alert",
        }
    }

    /// State reached when this stage's dialogue is finalized.
    pub fn completes_into(&self) -> PipelineState {
        match self {
            Self::Pattern => PipelineState::PatternAnalyzed,
            Self::Cultural => PipelineState::CulturallyContextualized,
            Self::Risk => PipelineState::RiskAssessed,
            Self::Alert => PipelineState::Alerted,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
