use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::Message;

/// Title given to sessions before their first user message names them.
pub const DEFAULT_SESSION_TITLE: &str = "New chat";

/// Number of characters of the first user message kept in a derived title.
pub const TITLE_MAX_CHARS: usize = 20;

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque unique identifier.
    pub id: String,

    /// Display title.
    pub title: String,

    /// Messages in insertion order.
    pub messages: Vec<Message>,

    /// When the session was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Last time the session or one of its messages changed.
    #[serde(with = "crate::utils::time")]
    pub updated_at: OffsetDateTime,
}

impl Session {
    /// Create an empty session with a fresh id and the default title.
    pub fn new() -> Self {
        let now = crate::utils::time::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an empty session with the given title.
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::new()
        }
    }

    /// True if nothing has named this session yet.
    pub fn has_default_title(&self) -> bool {
        self.title.trim().is_empty() || self.title == DEFAULT_SESSION_TITLE
    }

    /// Look up a message by id.
    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// The message currently receiving a stream, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_streaming())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a session title from the first user message.
///
/// Runs of whitespace collapse to one space.  Titles longer than [`TITLE_MAX_CHARS`] characters
/// are cut and marked with `...`.  Blank content falls back to [`DEFAULT_SESSION_TITLE`].
pub fn derive_title(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }
    if collapsed.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
        title.push_str("...");
        title
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_titles_are_kept() {
        assert_eq!(derive_title("  What is Rust?  "), "What is Rust?");
    }

    #[test]
    fn long_titles_are_truncated_by_characters() {
        assert_eq!(
            derive_title("Explain the borrow checker in detail please"),
            "Explain the borrow c..."
        );
        assert_eq!(
            derive_title("请解释一下借用检查器是如何工作的以及它为什么重要呢"),
            "请解释一下借用检查器是如何工作的以及它为..."
        );
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(derive_title("a\n\n  b\tc"), "a b c");
    }

    #[test]
    fn blank_content_gets_default() {
        assert_eq!(derive_title(" \n "), DEFAULT_SESSION_TITLE);
    }

    #[test]
    fn exactly_max_chars_is_not_marked() {
        let twenty = "abcdefghijklmnopqrst";
        assert_eq!(derive_title(twenty), twenty);
    }

    #[test]
    fn new_session_is_untitled_and_empty() {
        let session = Session::new();
        assert!(session.has_default_title());
        assert!(session.messages.is_empty());
        assert_eq!(session.created_at, session.updated_at);
        assert!(!Session::with_title("Notes").has_default_title());
    }

    #[test]
    fn serialization_uses_camel_case() {
        let session = Session::with_title("Notes");
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }
}
