use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use vigil_core::dialogue::{DialogueTurn, Generation};
use vigil_core::errors::ReasoningError;
use vigil_core::reasoner::Reasoner;
use vigil_core::role::{Capability, Role};

/// Pre-programmed reply for deterministic testing without a live service.
#[derive(Clone, Debug)]
pub enum MockReply {
    Say(Generation),
    Error(ReasoningError),
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn reply(text: &str) -> Self {
        Self::Say(Generation::reply(text))
    }

    /// A reply that also ends the conversation.
    pub fn last(text: &str) -> Self {
        Self::Say(Generation::last(text))
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

type Responder = dyn Fn(&Role, &str, &[DialogueTurn]) -> MockReply + Send + Sync;

/// One recorded `generate` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub role: String,
    pub capability: Capability,
    pub prompt: String,
    pub conversation_len: usize,
}

/// Mock reasoner replying from per-capability queues.
///
/// Each capability has a FIFO of replies. When a queue is empty the
/// responder function (if any) decides; otherwise the call fails, so an
/// unexpected extra call shows up as an error in tests.
#[derive(Default)]
pub struct ScriptedReasoner {
    queues: Mutex<HashMap<Capability, VecDeque<MockReply>>>,
    responder: Option<Box<Responder>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_count: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reasoner whose every reply is computed from the call.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Role, &str, &[DialogueTurn]) -> MockReply + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(f)),
            ..Self::default()
        }
    }

    /// Queue replies for a capability, after any already queued.
    pub fn on(self, capability: Capability, replies: Vec<MockReply>) -> Self {
        self.queues
            .lock()
            .entry(capability)
            .or_default()
            .extend(replies);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn next_reply(&self, role: &Role, prompt: &str, conversation: &[DialogueTurn]) -> MockReply {
        let queued = self
            .queues
            .lock()
            .get_mut(&role.capability())
            .and_then(VecDeque::pop_front);
        match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(f)) => f(role, prompt, conversation),
            (None, None) => MockReply::Error(ReasoningError::InvalidRequest(format!(
                "ScriptedReasoner: no reply configured for {}",
                role.name()
            ))),
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        role: &Role,
        prompt: &str,
        conversation: &[DialogueTurn],
    ) -> Result<Generation, ReasoningError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(RecordedCall {
            role: role.name().to_string(),
            capability: role.capability(),
            prompt: prompt.to_string(),
            conversation_len: conversation.len(),
        });

        let mut current = self.next_reply(role, prompt, conversation);
        // Unrolls nested delays iteratively to avoid recursive async.
        loop {
            match current {
                MockReply::Say(generation) => return Ok(generation),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
