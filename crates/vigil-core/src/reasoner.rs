use async_trait::async_trait;

use crate::dialogue::{DialogueTurn, Generation};
use crate::errors::ReasoningError;
use crate::role::Role;

/// The external reasoning service that writes each role's side of a dialogue.
///
/// Model choice, credentials and prompt formatting live behind this trait.
/// Implementations own their retry policy; callers apply timeouts.
#[async_trait]
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &str;

    /// Produce `role`'s next utterance given the session's opening `prompt`
    /// and the turns generated so far.
    async fn generate(
        &self,
        role: &Role,
        prompt: &str,
        conversation: &[DialogueTurn],
    ) -> Result<Generation, ReasoningError>;
}
