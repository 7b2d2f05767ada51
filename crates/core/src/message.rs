//! Display-oriented message records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use toolchat_model::{ToolCall, WireMessage};
use uuid::Uuid;

/// Who authored a display message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    /// The human user.
    User,
    /// The assistant, including tool results and notices.
    Assistant,
}

/// The kind of a display message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A text message.
    Text,
    /// An image referenced by `media_ref`.
    Image,
    /// Anything else, never sent to the engine.
    Other,
}

/// Orchestration flags attached to a display message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// A notice (welcome message, round limit, ...) that is never part of the
    /// wire history.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub system: bool,
    /// Present if this message is an assistant turn that requested tools.
    /// Holds the exact tool calls that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present if this message is a tool result, holding the `tool` wire
    /// message sent back to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_message: Option<WireMessage>,
    /// This message was imported from a `tool` wire message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tool_result: bool,
    /// The originating tool call id of an imported tool result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// The reasoning the engine produced before this answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// This message was produced by an import.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub imported: bool,
}

/// A message in the conversation store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub id: String,
    pub author: Author,
    pub created_at: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DisplayMessage {
    /// Creates a text message with a fresh id.
    pub fn text<S: Into<String>>(author: Author, text: S) -> Self {
        Self {
            id: new_id(),
            author,
            created_at: Utc::now(),
            kind: MessageKind::Text,
            text: Some(text.into()),
            media_ref: None,
            metadata: Metadata::default(),
        }
    }

    /// Creates an image message with a fresh id.
    pub fn image<S: Into<String>>(author: Author, media_ref: S) -> Self {
        Self {
            id: new_id(),
            author,
            created_at: Utc::now(),
            kind: MessageKind::Image,
            text: None,
            media_ref: Some(media_ref.into()),
            metadata: Metadata::default(),
        }
    }

    /// Creates a system-flagged assistant notice.
    #[inline]
    pub fn notice<S: Into<String>>(text: S) -> Self {
        Self::text(Author::Assistant, text).with_metadata(|metadata| {
            metadata.system = true;
        })
    }

    /// Modifies the metadata in place and returns the message.
    #[inline]
    pub fn with_metadata(mut self, f: impl FnOnce(&mut Metadata)) -> Self {
        f(&mut self.metadata);
        self
    }

    /// Returns the text of this message, or an empty string.
    #[inline]
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Generates a random identifier for messages and tool calls.
#[inline]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
