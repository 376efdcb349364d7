use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use vigil_core::alert::{AlertDispatcher, AlertPayload, DispatchAck};
use vigil_core::errors::DispatchError;

/// In-memory dispatcher that keeps every payload it receives.
///
/// With [`failing`](Self::failing) it records the attempt and returns the
/// configured error instead of an acknowledgement.
#[derive(Default)]
pub struct RecordingDispatcher {
    delivered: Mutex<Vec<AlertPayload>>,
    failure: Option<DispatchError>,
    attempts: AtomicUsize,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: DispatchError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    /// Dispatch calls so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Payloads that were acknowledged.
    pub fn delivered(&self) -> Vec<AlertPayload> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl AlertDispatcher for RecordingDispatcher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn dispatch(&self, payload: AlertPayload) -> Result<DispatchAck, DispatchError> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let ack = DispatchAck {
            alert_id: payload.id.clone(),
            channel: self.name().to_string(),
            reference: Some(format!("recorded-{attempt}")),
            delivered_at: Utc::now(),
        };
        self.delivered.lock().push(payload);
        Ok(ack)
    }
}
