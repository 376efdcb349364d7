use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use vigil_core::dialogue::DialogueTranscript;
use vigil_core::reasoner::Reasoner;
use vigil_core::role::Role;

use crate::error::EngineError;

/// Runs bounded two-party exchanges against a [`Reasoner`].
///
/// A session of `max_turns` rounds opens with the prompt as the initiator's
/// first message. Each round the recipient replies, and every round after the
/// first starts with a generated initiator turn. The session ends early when a
/// speaker marks its reply final or returns nothing.
#[derive(Clone)]
pub struct DialogueSession {
    reasoner: Arc<dyn Reasoner>,
}

enum Step {
    Continue,
    Finished,
}

impl DialogueSession {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }

    pub fn reasoner(&self) -> &Arc<dyn Reasoner> {
        &self.reasoner
    }

    /// Run one session. With a `timeout`, the whole exchange must finish in
    /// time or the session fails with [`EngineError::SessionTimeout`].
    #[instrument(skip_all, fields(initiator = initiator.name(), recipient = recipient.name(), max_turns = max_turns))]
    pub async fn run(
        &self,
        initiator: &Role,
        recipient: &Role,
        prompt: &str,
        max_turns: u32,
        timeout: Option<Duration>,
    ) -> Result<DialogueTranscript, EngineError> {
        if max_turns == 0 {
            return Err(EngineError::InvalidArgument(
                "max_turns must be at least 1".into(),
            ));
        }

        let exchange = self.exchange(initiator, recipient, prompt, max_turns);
        let transcript = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                warn!(timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX), "dialogue session timed out");
                EngineError::SessionTimeout(limit)
            })??,
            None => exchange.await?,
        };

        if transcript.is_empty() {
            return Err(EngineError::EmptyTranscript {
                initiator: transcript.initiator,
                recipient: transcript.recipient,
            });
        }
        debug!(
            turns = transcript.len(),
            completed_early = transcript.completed_early(),
            "dialogue session finished"
        );
        Ok(transcript)
    }

    async fn exchange(
        &self,
        initiator: &Role,
        recipient: &Role,
        prompt: &str,
        max_turns: u32,
    ) -> Result<DialogueTranscript, EngineError> {
        let mut transcript = DialogueTranscript::new(initiator, recipient, prompt, max_turns);

        for round in 0..max_turns {
            if round > 0 {
                if let Step::Finished = self.speak(initiator, &mut transcript).await? {
                    break;
                }
            }
            if let Step::Finished = self.speak(recipient, &mut transcript).await? {
                break;
            }
        }
        Ok(transcript)
    }

    async fn speak(&self, speaker: &Role, transcript: &mut DialogueTranscript) -> Result<Step, EngineError> {
        let generation = self
            .reasoner
            .generate(speaker, &transcript.prompt, transcript.turns())
            .await?;

        if generation.content.trim().is_empty() {
            debug!(speaker = speaker.name(), "empty reply ends the session");
            transcript.mark_completed_early();
            return Ok(Step::Finished);
        }

        // The round loop never asks for more turns than the capacity allows.
        if let Err(full) = transcript.push(speaker, generation.content) {
            warn!(capacity = full.capacity, "transcript full, dropping reply");
            return Ok(Step::Finished);
        }
        debug!(speaker = speaker.name(), index = transcript.len() - 1, "turn recorded");

        if generation.is_final {
            transcript.mark_completed_early();
            return Ok(Step::Finished);
        }
        Ok(Step::Continue)
    }
}
