use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

/// Default sampling temperature sent with every request.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default cap on generated tokens.
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// A message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// The author of the message.
    pub role: Role,

    /// The message text.
    pub content: String,
}

/// Body of a streaming chat-completions request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model identifier.
    pub model: String,

    /// Conversation, system messages first.
    pub messages: Vec<WireMessage>,

    /// Sampling temperature.
    pub temperature: f32,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Always true for this client.
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Build a streaming request from conversation messages.
    pub fn new(model: &str, messages: &[Message]) -> Self {
        Self {
            model: model.trim().to_string(),
            messages: prepare_messages(messages),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream: true,
        }
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the maximum number of generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Order messages for transmission.
///
/// System messages move to the front.  The sort is stable, so relative order within the system
/// messages and within the rest is preserved.  Content is trimmed.
pub fn prepare_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by_key(|m| m.role != Role::System);
    ordered
        .into_iter()
        .map(|m| WireMessage {
            role: m.role,
            content: m.content.trim().to_string(),
        })
        .collect()
}
