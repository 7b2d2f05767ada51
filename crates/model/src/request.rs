use serde::{Deserialize, Serialize};

use crate::{ToolDefinition, WireMessage};

/// A request to be sent to the completion engine.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionRequest {
    /// The input messages, in chronological order.
    pub messages: Vec<WireMessage>,
    /// Options for this completion.
    pub options: CompletionOptions,
}

/// Options that accompany the messages of a completion request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Tools that are available to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    /// How the model should pick tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Whether the engine should render the prompt with the model's own
    /// (Jinja) chat template.
    #[serde(default)]
    pub jinja: bool,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// The tool selection directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides whether to call tools.
    Auto,
    /// The model must not call tools.
    None,
    /// The model must call at least one tool.
    Required,
}
