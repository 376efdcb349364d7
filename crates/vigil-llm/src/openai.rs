use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use vigil_core::dialogue::{DialogueTurn, Generation};
use vigil_core::errors::ReasoningError;
use vigil_core::reasoner::Reasoner;
use vigil_core::role::Role;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Marker a speaker appends when it considers the conversation finished.
pub const TERMINATE_MARKER: &str = "TERMINATE";

const TERMINATE_INSTRUCTION: &str =
    "When the discussion has reached its conclusion, end your reply with the word TERMINATE.";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
}

/// Chat-completions backend speaking the OpenAI wire format.
#[derive(Debug)]
pub struct OpenAiReasoner {
    client: Client,
    config: OpenAiConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiReasoner {
    pub fn new(config: OpenAiConfig) -> Result<Self, ReasoningError> {
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(ReasoningError::Authentication("API key is empty".into()));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ReasoningError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Lay out the conversation from `role`'s point of view: its own turns are
    /// `assistant`, the other party's are `user`.
    ///
    /// The opening prompt belongs to the initiator. The recipient always
    /// produces the first generated turn, so a speaker that did not produce
    /// `conversation[0]` is the initiator.
    fn build_messages(role: &Role, prompt: &str, conversation: &[DialogueTurn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(conversation.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: format!("{}\n\n{TERMINATE_INSTRUCTION}", role.instructions()),
        });

        let is_initiator = conversation
            .first()
            .is_some_and(|first| first.speaker != role.name());
        messages.push(ChatMessage {
            role: if is_initiator { "assistant" } else { "user" },
            content: prompt.to_string(),
        });

        for turn in conversation {
            messages.push(ChatMessage {
                role: if turn.speaker == role.name() { "assistant" } else { "user" },
                content: turn.content.clone(),
            });
        }
        messages
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ReasoningError {
        if e.is_timeout() {
            ReasoningError::Timeout(self.config.request_timeout)
        } else {
            ReasoningError::Network(e.to_string())
        }
    }
}

/// Split the terminate marker off a reply.
fn into_generation(raw: &str) -> Generation {
    if raw.contains(TERMINATE_MARKER) {
        Generation::last(raw.replace(TERMINATE_MARKER, "").trim())
    } else {
        Generation::reply(raw.trim())
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(model = %self.config.model, role = role.name(), turns = conversation.len()))]
    async fn generate(
        &self,
        role: &Role,
        prompt: &str,
        conversation: &[DialogueTurn],
    ) -> Result<Generation, ReasoningError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: Self::build_messages(role, prompt, conversation),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let hint = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(match ReasoningError::from_status(status.as_u16(), body) {
                ReasoningError::RateLimited { .. } => ReasoningError::RateLimited { retry_after: hint },
                other => other,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ReasoningError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ReasoningError::MalformedResponse("response has no choices".into()))?
            .message
            .content
            .unwrap_or_default();

        let generation = into_generation(&content);
        debug!(chars = generation.content.len(), is_final = generation.is_final, "reasoner replied");
        Ok(generation)
    }
}
