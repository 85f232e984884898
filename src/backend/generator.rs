use crate::error::{CallrelayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Chat history of one call, starting with the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![ChatMessage {
                role: Role::System,
                content: system_prompt.to_string(),
            }],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of completed user/assistant exchanges.
    pub fn exchanges(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }
}

/// Produces the full reply text for a finalized transcript.
///
/// The reply may contain segment boundary markers; it is not split here.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Generate a reply to `transcript` given the prior `conversation`.
    ///
    /// `conversation` does not yet contain `transcript`.
    async fn generate(&self, transcript: &str, conversation: &Conversation) -> Result<String>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Mock generator for testing
#[derive(Debug, Clone)]
pub struct MockReplyGenerator {
    replies: HashMap<String, String>,
    default_reply: String,
    should_fail: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockReplyGenerator {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            default_reply: "mock reply".to_string(),
            should_fail: false,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reply with `reply` whenever the transcript equals `transcript`.
    pub fn with_reply(mut self, transcript: &str, reply: &str) -> Self {
        self.replies
            .insert(transcript.to_string(), reply.to_string());
        self
    }

    /// Reply used for transcripts without a specific reply.
    pub fn with_default_reply(mut self, reply: &str) -> Self {
        self.default_reply = reply.to_string();
        self
    }

    /// Configure the mock to fail on generate
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Wait before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockReplyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyGenerator for MockReplyGenerator {
    async fn generate(&self, transcript: &str, _conversation: &Conversation) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.should_fail {
            return Err(CallrelayError::Generation {
                message: "mock generation failure".to_string(),
            });
        }

        Ok(self
            .replies
            .get(transcript)
            .cloned()
            .unwrap_or_else(|| self.default_reply.clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(feature = "http-backends")]
pub use openai::OpenAiReplyGenerator;

#[cfg(feature = "http-backends")]
mod openai {
    use super::{ChatMessage, Conversation, ReplyGenerator, Role};
    use crate::config::LlmConfig;
    use crate::error::{CallrelayError, Result};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    pub(super) struct CompletionRequest<'a> {
        pub(super) model: &'a str,
        pub(super) messages: Vec<ChatMessage>,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct CompletionResponse {
        pub(super) choices: Vec<Choice>,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct Choice {
        pub(super) message: ChoiceMessage,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct ChoiceMessage {
        #[serde(default)]
        pub(super) content: Option<String>,
    }

    impl CompletionResponse {
        pub(super) fn into_text(self) -> Result<String> {
            self.choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| CallrelayError::Generation {
                    message: "completion contained no message".to_string(),
                })
        }
    }

    /// Reply generator backed by an OpenAI-compatible chat completions API.
    pub struct OpenAiReplyGenerator {
        client: reqwest::Client,
        endpoint: String,
        model: String,
        api_key: String,
    }

    impl OpenAiReplyGenerator {
        pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
                model: config.model.clone(),
                api_key: api_key.into(),
            }
        }

        pub(super) fn request<'a>(
            &'a self,
            transcript: &str,
            conversation: &Conversation,
        ) -> CompletionRequest<'a> {
            let mut messages = conversation.messages().to_vec();
            messages.push(ChatMessage {
                role: Role::User,
                content: transcript.to_string(),
            });
            CompletionRequest {
                model: &self.model,
                messages,
            }
        }
    }

    #[async_trait]
    impl ReplyGenerator for OpenAiReplyGenerator {
        async fn generate(&self, transcript: &str, conversation: &Conversation) -> Result<String> {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&self.request(transcript, conversation))
                .send()
                .await
                .map_err(|e| CallrelayError::Generation {
                    message: format!("request failed: {}", e),
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(CallrelayError::Generation {
                    message: format!("API returned {}: {}", status, body),
                });
            }

            let completion: CompletionResponse =
                response.json().await.map_err(|e| CallrelayError::Generation {
                    message: format!("invalid completion response: {}", e),
                })?;
            completion.into_text()
        }

        fn name(&self) -> &str {
            "openai"
        }
    }
}
