use serde::{Deserialize, Serialize};

use crate::ids::DialogueId;
use crate::role::{Capability, Role};

/// One generated utterance in a dialogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub speaker: String,
    pub capability: Capability,
    pub content: String,
    /// Zero-based position within the transcript.
    pub index: usize,
}

/// What the reasoning service returns for one turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub content: String,
    /// The speaker considers the conversation complete.
    pub is_final: bool,
}

impl Generation {
    pub fn reply(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_final: false,
        }
    }

    pub fn last(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_final: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("transcript already holds its maximum of {capacity} turns")]
pub struct TranscriptFull {
    pub capacity: usize,
}

/// Ordered, append-only record of one dialogue session.
///
/// The opening prompt is the initiator's first message and is kept apart from
/// the generated turns. With `max_rounds` round-trips the initiator speaks
/// `max_rounds - 1` generated times and the recipient `max_rounds` times, so
/// the transcript never holds more than `2 * max_rounds - 1` turns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DialogueTranscript {
    pub id: DialogueId,
    pub initiator: String,
    pub recipient: String,
    pub prompt: String,
    pub max_rounds: u32,
    turns: Vec<DialogueTurn>,
    completed_early: bool,
}

impl DialogueTranscript {
    pub fn new(initiator: &Role, recipient: &Role, prompt: impl Into<String>, max_rounds: u32) -> Self {
        Self {
            id: DialogueId::new(),
            initiator: initiator.name().to_string(),
            recipient: recipient.name().to_string(),
            prompt: prompt.into(),
            max_rounds,
            turns: Vec::new(),
            completed_early: false,
        }
    }

    pub fn capacity(&self) -> usize {
        (self.max_rounds as usize * 2).saturating_sub(1)
    }

    pub fn is_full(&self) -> bool {
        self.turns.len() >= self.capacity()
    }

    /// Append a turn spoken by `speaker`.
    pub fn push(&mut self, speaker: &Role, content: impl Into<String>) -> Result<&DialogueTurn, TranscriptFull> {
        if self.is_full() {
            return Err(TranscriptFull {
                capacity: self.capacity(),
            });
        }
        let index = self.turns.len();
        self.turns.push(DialogueTurn {
            speaker: speaker.name().to_string(),
            capability: speaker.capability(),
            content: content.into(),
            index,
        });
        Ok(&self.turns[index])
    }

    /// Record that a participant ended the conversation before the bound.
    pub fn mark_completed_early(&mut self) {
        self.completed_early = true;
    }

    pub fn completed_early(&self) -> bool {
        self.completed_early
    }

    pub fn turns(&self) -> &[DialogueTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The final turn, which is the session's effective output.
    pub fn last_turn(&self) -> Option<&DialogueTurn> {
        self.turns.last()
    }
}
