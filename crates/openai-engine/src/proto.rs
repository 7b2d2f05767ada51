use serde::{Deserialize, Serialize};
use toolchat_model::{
    CompletionRequest, ToolChoice, ToolDefinition, WireMessage,
};

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct FunctionToolCall {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// A tool call fragment. Fragments with the same `index` patch each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ToolCall {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub function: Option<FunctionToolCall>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    // Sent by servers that split out the thinking (llama.cpp, DeepSeek).
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Reply to a llama.cpp slot save or restore.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct SlotReply {
    pub n_saved: Option<usize>,
    pub n_restored: Option<usize>,
}

// ------------------------
// Types sent to the server
// ------------------------

/// The request body. Wire messages and tool definitions already have the
/// OpenAI shape, so they are sent as they are.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream_options: StreamOptions,
    stream: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// Names the slot file, which the server keeps under its `--slot-save-path`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SlotRequest<'a> {
    pub filename: &'a str,
}

fn is_empty<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

#[inline]
pub fn create_request<'a>(
    req: &'a CompletionRequest,
    config: &'a OpenAIConfig,
) -> ChatCompletionRequest<'a> {
    let options = &req.options;
    ChatCompletionRequest {
        model: &config.model,
        messages: &req.messages,
        tools: &options.tools,
        // The API rejects a tool choice without tools.
        tool_choice: options.tool_choice.filter(|_| !options.tools.is_empty()),
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        stream_options: StreamOptions {
            include_usage: true,
        },
        stream: true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toolchat_model::{CompletionOptions, ToolCall};

    use super::*;
    use crate::OpenAIConfigBuilder;

    #[test]
    fn test_slot_reply() {
        let saved: SlotReply = serde_json::from_value(json!({
            "id_slot": 0,
            "filename": "chat.bin",
            "n_saved": 42,
            "n_written": 8192,
        }))
        .unwrap();
        assert_eq!(saved.n_saved, Some(42));
        assert_eq!(saved.n_restored, None);

        let body = serde_json::to_value(SlotRequest {
            filename: "chat.bin",
        })
        .unwrap();
        assert_eq!(body, json!({ "filename": "chat.bin" }));
    }

    #[test]
    fn test_create_request() {
        let request = CompletionRequest {
            messages: vec![
                WireMessage::system("You are a helpful assistant."),
                WireMessage::user("What's the weather?"),
                WireMessage::assistant(
                    "",
                    vec![ToolCall::function("call_1", "get_weather", "{}")],
                ),
                WireMessage::tool("call_1", "Sunny"),
            ],
            options: CompletionOptions {
                tools: vec![ToolDefinition::function(
                    "get_weather",
                    "Gets the weather.",
                    json!({ "type": "object", "properties": {} }),
                )],
                tool_choice: Some(ToolChoice::Auto),
                max_tokens: Some(256),
                ..Default::default()
            },
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();
        let body =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "custom",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant." },
                    { "role": "user", "content": "What's the weather?" },
                    {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "get_weather", "arguments": "{}" }
                        }]
                    },
                    { "role": "tool", "tool_call_id": "call_1", "content": "Sunny" }
                ],
                "tools": [{
                    "type": "function",
                    "function": {
                        "name": "get_weather",
                        "description": "Gets the weather.",
                        "parameters": { "type": "object", "properties": {} }
                    }
                }],
                "tool_choice": "auto",
                "max_tokens": 256,
                "stream_options": { "include_usage": true },
                "stream": true
            })
        );
    }

    #[test]
    fn test_tool_choice_requires_tools() {
        let request = CompletionRequest {
            messages: vec![WireMessage::user("Hi")],
            options: CompletionOptions {
                tool_choice: Some(ToolChoice::None),
                ..Default::default()
            },
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx").build();
        let body =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }
}
