use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use vigil_core::alert::{AlertDispatcher, AlertPayload, DispatchAck};
use vigil_core::errors::DispatchError;

/// Writes alerts to the structured log. Never fails.
#[derive(Clone, Debug, Default)]
pub struct LogDispatcher;

impl LogDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    async fn dispatch(&self, payload: AlertPayload) -> Result<DispatchAck, DispatchError> {
        warn!(
            alert_id = %payload.id,
            request_id = %payload.request_id,
            region = payload.region.as_str(),
            timeframe = %payload.timeframe,
            level = payload.level.as_str(),
            actions = payload.recommended_actions.len(),
            message = %payload.message,
            "health alert issued"
        );
        Ok(DispatchAck {
            alert_id: payload.id,
            channel: self.name().to_string(),
            reference: None,
            delivered_at: Utc::now(),
        })
    }
}
