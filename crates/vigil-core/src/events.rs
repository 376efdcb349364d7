use serde::{Deserialize, Serialize};

use crate::ids::{AlertId, RequestId};
use crate::pipeline::{PipelineState, Stage};
use crate::risk::{RiskCategory, RiskLevel};

/// Progress events broadcast while a request moves through the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    #[serde(rename = "state_changed")]
    StateChanged {
        request_id: RequestId,
        from: PipelineState,
        to: PipelineState,
    },

    #[serde(rename = "stage_started")]
    StageStarted { request_id: RequestId, stage: Stage },

    #[serde(rename = "stage_completed")]
    StageCompleted {
        request_id: RequestId,
        stage: Stage,
        turns: usize,
        duration_ms: u64,
    },

    #[serde(rename = "matrix_updated")]
    MatrixUpdated {
        request_id: RequestId,
        categories: Vec<RiskCategory>,
    },

    #[serde(rename = "alert_dispatched")]
    AlertDispatched {
        request_id: RequestId,
        alert_id: AlertId,
        channel: String,
    },

    #[serde(rename = "alert_dispatch_failed")]
    AlertDispatchFailed {
        request_id: RequestId,
        alert_id: AlertId,
        error: String,
    },

    #[serde(rename = "request_completed")]
    RequestCompleted { request_id: RequestId, level: RiskLevel },

    #[serde(rename = "request_failed")]
    RequestFailed {
        request_id: RequestId,
        state: PipelineState,
        kind: String,
    },
}

impl PipelineEvent {
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::StateChanged { request_id, .. }
            | Self::StageStarted { request_id, .. }
            | Self::StageCompleted { request_id, .. }
            | Self::MatrixUpdated { request_id, .. }
            | Self::AlertDispatched { request_id, .. }
            | Self::AlertDispatchFailed { request_id, .. }
            | Self::RequestCompleted { request_id, .. }
            | Self::RequestFailed { request_id, .. } => request_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::MatrixUpdated { .. } => "matrix_updated",
            Self::AlertDispatched { .. } => "alert_dispatched",
            Self::AlertDispatchFailed { .. } => "alert_dispatch_failed",
            Self::RequestCompleted { .. } => "request_completed",
            Self::RequestFailed { .. } => "request_failed",
        }
    }
}
