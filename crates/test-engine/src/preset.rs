use serde::{Deserialize, Serialize};
use toolchat_model::{ErrorKind, ToolCall};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "token")]
    Token(String),
    #[serde(rename = "reasoning")]
    Reasoning(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCall),
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failure` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
    /// The kind of the simulated failures.
    #[serde(default = "default_failure_kind")]
    pub failure_kind: ErrorKind,
    /// If set, reported as the authoritative content instead of the
    /// concatenated tokens.
    #[serde(default)]
    pub content: Option<String>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            failure_kind: default_failure_kind(),
            content: None,
        }
    }

    /// Creates a `PresetResponse` that streams `text` split on spaces.
    pub fn with_text(text: &str) -> Self {
        let mut events = Vec::new();
        let mut words = text.split(' ').peekable();
        while let Some(word) = words.next() {
            let mut token = word.to_owned();
            if words.peek().is_some() {
                token.push(' ');
            }
            events.push(PresetEvent::Token(token));
        }
        Self::with_events(events)
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the kind of the simulated failures.
    #[inline]
    pub fn with_failure_kind(mut self, kind: ErrorKind) -> Self {
        self.failure_kind = kind;
        self
    }

    /// Sets the authoritative content reported after streaming.
    #[inline]
    pub fn with_content<S: Into<String>>(mut self, content: S) -> Self {
        self.content = Some(content.into());
        self
    }

    pub(crate) fn has_tool_calls(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)))
    }
}

#[inline]
fn default_failure_kind() -> ErrorKind {
    ErrorKind::Other
}
