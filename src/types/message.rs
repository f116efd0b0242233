use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::types::Role;

/// Delivery state of a message.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Created locally, not yet acknowledged.
    Sending,

    /// Receiving content from the model.
    Streaming,

    /// Complete.
    #[default]
    Success,

    /// The request failed; any partial content is kept.
    Error,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStatus::Sending => write!(f, "sending"),
            MessageStatus::Streaming => write!(f, "streaming"),
            MessageStatus::Success => write!(f, "success"),
            MessageStatus::Error => write!(f, "error"),
        }
    }
}

/// Where a message came from when it was composed against a web page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// URL of the page the message refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,

    /// Text the user had selected on that page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

/// One entry in a session's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque unique identifier.
    pub id: String,

    /// Who wrote the message.
    pub role: Role,

    /// Message text.  Only grows while the message is streaming.
    pub content: String,

    /// When the message was created.
    #[serde(with = "crate::utils::time")]
    pub timestamp: OffsetDateTime,

    /// Delivery state.
    #[serde(default)]
    pub status: MessageStatus,

    /// Optional page context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    /// Create a message with a fresh id and the current time.
    pub fn new(role: Role, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: crate::utils::time::now(),
            status,
            metadata: None,
        }
    }

    /// A completed user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageStatus::Success)
    }

    /// A completed system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, MessageStatus::Success)
    }

    /// A completed assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, MessageStatus::Success)
    }

    /// An empty assistant message that is about to receive a stream.
    pub fn streaming_placeholder() -> Self {
        Self::new(Role::Assistant, "", MessageStatus::Streaming)
    }

    /// Attach page metadata.
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Returns true while the message is receiving a stream.
    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

/// A partial update merged into an existing message by the conversation store.
///
/// Fields left as `None` are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    /// New status.
    pub status: Option<MessageStatus>,
    /// Replacement content.
    pub content: Option<String>,
    /// Replacement metadata.
    pub metadata: Option<MessageMetadata>,
}

impl MessageUpdate {
    /// An update that only changes the status.
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Also replace the content.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Also replace the metadata.
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Merge this update into `message`.
    pub fn apply_to(self, message: &mut Message) {
        if let Some(status) = self.status {
            message.status = status;
        }
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(metadata) = self.metadata {
            message.metadata = Some(metadata);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_messages_have_distinct_ids() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, MessageStatus::Success);
    }

    #[test]
    fn placeholder_is_streaming() {
        let message = Message::streaming_placeholder();
        assert!(message.is_streaming());
        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.is_empty());
    }

    #[test]
    fn serialization_uses_camel_case() {
        let message = Message::user("hello").with_metadata(MessageMetadata {
            page_url: Some("https://example.com".to_string()),
            selected_text: None,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["status"], "success");
        assert_eq!(json["metadata"]["pageUrl"], "https://example.com");
        assert!(json["metadata"].get("selectedText").is_none());
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn missing_status_defaults_to_success() {
        let json = serde_json::json!({
            "id": "m1",
            "role": "assistant",
            "content": "done",
            "timestamp": "2024-01-01T00:00:00Z",
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.status, MessageStatus::Success);
        assert!(message.metadata.is_none());
    }

    #[test]
    fn update_merges_only_given_fields() {
        let mut message = Message::streaming_placeholder();
        message.content.push_str("partial");
        MessageUpdate::status(MessageStatus::Error).apply_to(&mut message);
        assert_eq!(message.status, MessageStatus::Error);
        assert_eq!(message.content, "partial");

        MessageUpdate::default()
            .with_content("replaced")
            .apply_to(&mut message);
        assert_eq!(message.status, MessageStatus::Error);
        assert_eq!(message.content, "replaced");
    }
}
