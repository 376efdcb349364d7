use serde::Serialize;

use crate::ids::RequestId;

/// One observation submitted for assessment. Immutable once built.
///
/// The region stays a raw string so an unregistered code surfaces as an
/// unknown-region failure from the pipeline rather than at construction.
#[derive(Clone, Debug, Serialize)]
pub struct AssessmentRequest {
    id: RequestId,
    observation: serde_json::Value,
    region: String,
    timeframe: String,
}

impl AssessmentRequest {
    pub fn new(
        observation: serde_json::Value,
        region: impl Into<String>,
        timeframe: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            observation,
            region: region.into(),
            timeframe: timeframe.into(),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn observation(&self) -> &serde_json::Value {
        &self.observation
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }
}
