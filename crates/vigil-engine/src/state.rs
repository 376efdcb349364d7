use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use vigil_core::events::PipelineEvent;
use vigil_core::ids::RequestId;
use vigil_core::pipeline::PipelineState;

/// Tracks one request through the pipeline states and announces every
/// transition on the event channel.
pub struct RunTracker {
    request_id: RequestId,
    state: PipelineState,
    history: Vec<PipelineState>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl RunTracker {
    pub fn new(request_id: RequestId, event_tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self {
            request_id,
            state: PipelineState::Received,
            history: vec![PipelineState::Received],
            event_tx,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state visited, starting with `Received`.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to `next`. Illegal transitions are a coordinator bug: they are
    /// logged and ignored.
    pub fn advance(&mut self, next: PipelineState) {
        let allowed = self.state.can_transition_to(next);
        debug_assert!(allowed, "illegal pipeline transition {} -> {}", self.state, next);
        if !allowed {
            error!(from = %self.state, to = %next, "illegal pipeline transition");
            return;
        }
        let from = self.state;
        self.state = next;
        self.history.push(next);
        debug!(request_id = %self.request_id, %from, to = %next, "pipeline state changed");
        self.send_event(PipelineEvent::StateChanged {
            request_id: self.request_id.clone(),
            from,
            to: next,
        });
    }

    /// Move to `Failed` and report the error kind. The state the failure
    /// happened in is returned.
    pub fn fail(&mut self, kind: &str) -> PipelineState {
        let at = self.state;
        if at.is_terminal() {
            return at;
        }
        self.advance(PipelineState::Failed);
        self.send_event(PipelineEvent::RequestFailed {
            request_id: self.request_id.clone(),
            state: at,
            kind: kind.to_string(),
        });
        at
    }

    pub fn send_event(&self, event: PipelineEvent) {
        if self.event_tx.send(event).is_err() {
            warn!("no pipeline event receivers, event dropped");
        }
    }
}
