use std::borrow::Cow;
use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The role of a wire message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system instructions.
    System,
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
    /// The result of a tool call.
    Tool,
}

impl Role {
    /// Parses a role name as it appears on the wire.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }

    /// Returns the name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in the list consumed (and produced) by a completion engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum WireMessage {
    /// The system instructions.
    System {
        /// Message content.
        content: MessageContent,
    },
    /// A user input.
    User {
        /// Message content.
        content: MessageContent,
    },
    /// An assistant answer, possibly requesting tool calls.
    Assistant {
        /// Message content. `null` on the wire is read as empty text.
        #[serde(default, deserialize_with = "nullable_content")]
        content: MessageContent,
        /// Tool calls requested in this turn, in emission order.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        /// The thinking text produced before the answer, if the engine
        /// separates it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },
    /// The result of one tool call.
    Tool {
        /// The id of the call this message answers.
        tool_call_id: String,
        /// Message content.
        content: MessageContent,
    },
}

impl WireMessage {
    /// Creates a system message with text content.
    #[inline]
    pub fn system<S: Into<String>>(content: S) -> Self {
        WireMessage::System {
            content: MessageContent::Text(content.into()),
        }
    }

    /// Creates a user message with text content.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        WireMessage::User {
            content: MessageContent::Text(content.into()),
        }
    }

    /// Creates an assistant message with text content and tool calls.
    #[inline]
    pub fn assistant<S: Into<String>>(
        content: S,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        WireMessage::Assistant {
            content: MessageContent::Text(content.into()),
            tool_calls,
            reasoning_content: None,
        }
    }

    /// Creates a tool result message.
    #[inline]
    pub fn tool<S1: Into<String>, S2: Into<String>>(
        tool_call_id: S1,
        content: S2,
    ) -> Self {
        WireMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// Returns the role of this message.
    pub fn role(&self) -> Role {
        match self {
            WireMessage::System { .. } => Role::System,
            WireMessage::User { .. } => Role::User,
            WireMessage::Assistant { .. } => Role::Assistant,
            WireMessage::Tool { .. } => Role::Tool,
        }
    }

    /// Returns the content of this message.
    pub fn content(&self) -> &MessageContent {
        match self {
            WireMessage::System { content }
            | WireMessage::User { content }
            | WireMessage::Assistant { content, .. }
            | WireMessage::Tool { content, .. } => content,
        }
    }

    /// Returns a mutable reference to the content of this message.
    pub fn content_mut(&mut self) -> &mut MessageContent {
        match self {
            WireMessage::System { content }
            | WireMessage::User { content }
            | WireMessage::Assistant { content, .. }
            | WireMessage::Tool { content, .. } => content,
        }
    }

    /// Returns the reasoning carried by an assistant message.
    pub fn reasoning_content(&self) -> Option<&str> {
        match self {
            WireMessage::Assistant {
                reasoning_content, ..
            } => reasoning_content.as_deref(),
            _ => None,
        }
    }

    /// Returns the tool calls carried by an assistant message.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            WireMessage::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// The content of a wire message: plain text, or an ordered sequence of
/// typed parts for multimodal input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Multimodal content parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Returns the text of this content. Text parts are joined with line
    /// breaks, other parts are ignored.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            MessageContent::Text(text) => Cow::Borrowed(text),
            MessageContent::Parts(parts) => {
                let mut texts = parts.iter().filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                });
                let Some(first) = texts.next() else {
                    return Cow::Borrowed("");
                };
                let mut joined = first.to_owned();
                for text in texts {
                    joined.push('\n');
                    joined.push_str(text);
                }
                Cow::Owned(joined)
            }
        }
    }

    /// Returns the first text part (or the text itself), if any.
    pub fn first_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(parts) => {
                parts.iter().find_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
            }
        }
    }

    /// Returns whether there is nothing in this content.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for MessageContent {
    #[inline]
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<String> for MessageContent {
    #[inline]
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    #[inline]
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_owned())
    }
}

/// One part of a multimodal message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A text segment.
    Text {
        /// The text.
        text: String,
    },
    /// An image, by URL or `data:` URI.
    ImageUrl {
        /// The image location.
        image_url: ImageUrl,
    },
    /// An audio clip.
    InputAudio {
        /// The audio payload.
        input_audio: InputAudio,
    },
}

/// The location of an image part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// An `http(s)://`, `file://` or base64 `data:` URL.
    pub url: String,
}

/// The payload of an audio part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAudio {
    /// Base64-encoded audio data.
    pub data: String,
    /// Audio container format, e.g. `wav`.
    #[serde(default)]
    pub format: String,
}

/// The only kind of tool the wire format knows about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// A function tool.
    #[default]
    Function,
}

/// A tool call request emitted by the engine inside a completion.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    /// The call identifier. Engines may leave it empty, in which case the
    /// core assigns a synthetic one.
    #[serde(default)]
    pub id: String,
    /// The tool kind.
    #[serde(rename = "type", default)]
    pub kind: ToolKind,
    /// The function to invoke.
    pub function: FunctionCall,
}

impl ToolCall {
    /// Creates a function tool call.
    #[inline]
    pub fn function<S1, S2, S3>(id: S1, name: S2, arguments: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            id: id.into(),
            kind: ToolKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// The function part of a [`ToolCall`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the tool to call.
    pub name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    pub arguments: String,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool kind.
    #[serde(rename = "type", default)]
    pub kind: ToolKind,
    /// The function description.
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    /// Creates a function tool definition.
    #[inline]
    pub fn function<S1: Into<String>, S2: Into<String>>(
        name: S1,
        description: S2,
        parameters: Value,
    ) -> Self {
        Self {
            kind: ToolKind::Function,
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// Returns the name of the tool.
    #[inline]
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// The function part of a [`ToolDefinition`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool, as a JSON schema.
    pub parameters: Value,
}

fn nullable_content<'de, D>(deserializer: D) -> Result<MessageContent, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<MessageContent>::deserialize(deserializer)
        .map(Option::unwrap_or_default)
}
