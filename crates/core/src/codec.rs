//! Translation between display messages and the wire format.
//!
//! Everything here is a pure function of its inputs.

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use toolchat_model::{
    ContentPart, ImageUrl, MessageContent, Role, WireMessage,
};

use crate::message::{Author, DisplayMessage, MessageKind};

const IMAGE_PLACEHOLDER: &str = "[Base64 Image Data Omitted]";
const AUDIO_PLACEHOLDER: &str = "[Base64 Audio Data Omitted]";

/// Builds the wire message list for `messages` (newest first, as held by the
/// store), led by a system message holding `system_prompt`.
pub fn to_wire(
    messages: &[DisplayMessage],
    system_prompt: &str,
) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(WireMessage::system(system_prompt));

    for msg in messages.iter().rev() {
        if msg.metadata.system || msg.kind == MessageKind::Other {
            continue;
        }
        if let Some(tool_message) = &msg.metadata.tool_message {
            wire.push(tool_message.clone());
            continue;
        }
        if let Some(tool_calls) = &msg.metadata.tool_calls {
            wire.push(WireMessage::assistant(
                msg.text_or_empty(),
                tool_calls.clone(),
            ));
            continue;
        }

        let content = match msg.kind {
            MessageKind::Image => {
                let Some(url) = &msg.media_ref else {
                    continue;
                };
                MessageContent::Parts(vec![ContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                }])
            }
            _ => MessageContent::Text(msg.text_or_empty().to_owned()),
        };
        match msg.author {
            Author::User => wire.push(WireMessage::User { content }),
            Author::Assistant => {
                // An assistant placeholder left behind by a failed request.
                if content.is_empty() {
                    continue;
                }
                wire.push(WireMessage::Assistant {
                    content,
                    tool_calls: vec![],
                    reasoning_content: msg.metadata.reasoning.clone(),
                });
            }
        }
    }
    wire
}

/// Builds display messages (in chronological order) from a wire message
/// list. System messages are dropped, see [`parse_import`] for extracting
/// the system prompt.
pub fn from_wire(wire: &[WireMessage]) -> Vec<DisplayMessage> {
    let mut messages = Vec::with_capacity(wire.len());
    for wire_msg in wire {
        match wire_msg {
            WireMessage::System { .. } => {}
            WireMessage::Tool {
                tool_call_id,
                content,
            } => {
                let text = format!("Tool Result: {}", content.text());
                messages.push(
                    DisplayMessage::text(Author::Assistant, text)
                        .with_metadata(|metadata| {
                            metadata.tool_result = true;
                            metadata.tool_call_id = Some(tool_call_id.clone());
                            metadata.tool_message = Some(wire_msg.clone());
                            metadata.imported = true;
                        }),
                );
            }
            WireMessage::User { content } => {
                expand_content(&mut messages, Author::User, content, &[]);
            }
            WireMessage::Assistant {
                content,
                tool_calls,
                reasoning_content,
            } => {
                let start = messages.len();
                expand_content(
                    &mut messages,
                    Author::Assistant,
                    content,
                    tool_calls,
                );
                if let Some(first) = messages.get_mut(start) {
                    first.metadata.reasoning = reasoning_content.clone();
                }
            }
        }
    }
    messages
}

fn expand_content(
    messages: &mut Vec<DisplayMessage>,
    author: Author,
    content: &MessageContent,
    tool_calls: &[toolchat_model::ToolCall],
) {
    let tag = |msg: DisplayMessage| {
        msg.with_metadata(|metadata| {
            metadata.imported = true;
            if !tool_calls.is_empty() {
                metadata.tool_calls = Some(tool_calls.to_vec());
            }
        })
    };

    let parts = match content {
        MessageContent::Text(text) => {
            messages.push(tag(DisplayMessage::text(author, text.clone())));
            return;
        }
        MessageContent::Parts(parts) => parts,
    };

    let start = messages.len();
    for part in parts {
        let msg = match part {
            ContentPart::Text { text } => {
                DisplayMessage::text(author, text.clone())
            }
            ContentPart::ImageUrl { image_url } => {
                DisplayMessage::image(author, image_url.url.clone())
            }
            ContentPart::InputAudio { input_audio } => DisplayMessage {
                kind: MessageKind::Other,
                ..DisplayMessage::image(author, input_audio.data.clone())
            },
        };
        messages.push(tag(msg));
    }
    if messages.len() == start && !tool_calls.is_empty() {
        // Keep the tool calls even if there was nothing to show.
        messages.push(tag(DisplayMessage::text(author, "")));
    }
}

/// A conversation parsed from an import payload.
#[derive(Clone, Debug)]
pub struct ImportedConversation {
    /// Text of the first system message, to be applied as the new system
    /// prompt.
    pub system_prompt: Option<String>,
    /// Display messages in chronological order.
    pub messages: Vec<DisplayMessage>,
    /// The validated wire messages.
    pub wire: Vec<WireMessage>,
}

/// Errors raised while importing a conversation.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid JSON format: {0}")]
    Json(#[from] serde_json::Error),
    #[error("messages must be an array")]
    NotAnArray,
    #[error("message #{index} is invalid: {reason}")]
    InvalidMessage { index: usize, reason: String },
    #[error("validation failed: {0}")]
    Rejected(String),
    #[error("chat has been shut down")]
    Closed,
}

/// Parses and validates a JSON array of wire messages.
pub fn parse_import(json: &str) -> Result<ImportedConversation, ImportError> {
    let value: Value = serde_json::from_str(json.trim())?;
    let Value::Array(entries) = value else {
        return Err(ImportError::NotAnArray);
    };

    let wire = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| check_entry(index, entry))
        .collect::<Result<Vec<_>, _>>()?;
    check_tool_call_ids(&wire)?;

    let system_prompt = wire
        .iter()
        .find(|msg| msg.role() == Role::System)
        .and_then(|msg| msg.content().first_text())
        .map(str::to_owned);
    let messages = from_wire(&wire);
    Ok(ImportedConversation {
        system_prompt,
        messages,
        wire,
    })
}

fn check_entry(index: usize, entry: Value) -> Result<WireMessage, ImportError> {
    let invalid = |reason: String| ImportError::InvalidMessage { index, reason };

    let Some(role) = entry.get("role").and_then(Value::as_str) else {
        return Err(invalid("missing role".to_owned()));
    };
    let Some(role) = Role::from_name(role) else {
        return Err(invalid(format!("unknown role `{role}`")));
    };
    let has_tool_calls = entry
        .get("tool_calls")
        .is_some_and(|tool_calls| !tool_calls.is_null());
    if has_tool_calls && role != Role::Assistant {
        return Err(invalid(format!("`tool_calls` in a {role} message")));
    }
    serde_json::from_value(entry).map_err(|err| invalid(err.to_string()))
}

/// Every `tool` message must answer a call made by an earlier assistant
/// message.
fn check_tool_call_ids(wire: &[WireMessage]) -> Result<(), ImportError> {
    let mut call_ids = HashSet::new();
    for (index, msg) in wire.iter().enumerate() {
        match msg {
            WireMessage::Assistant { tool_calls, .. } => {
                call_ids.extend(tool_calls.iter().map(|call| call.id.as_str()));
            }
            WireMessage::Tool { tool_call_id, .. }
                if !call_ids.contains(tool_call_id.as_str()) =>
            {
                return Err(ImportError::InvalidMessage {
                    index,
                    reason: format!("no earlier tool call with id `{tool_call_id}`"),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// Whether embedded media payloads are kept when exporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Redaction {
    /// Base64 payloads are replaced with placeholders, for display.
    #[default]
    Redacted,
    /// Everything is kept.
    Full,
}

/// Renders the conversation as a pretty-printed JSON array of wire
/// messages.
pub fn export(
    messages: &[DisplayMessage],
    system_prompt: &str,
    redaction: Redaction,
) -> Result<String, serde_json::Error> {
    let mut wire = to_wire(messages, system_prompt);
    if redaction == Redaction::Redacted {
        wire.iter_mut().for_each(redact);
    }
    serde_json::to_string_pretty(&wire)
}

fn redact(msg: &mut WireMessage) {
    let MessageContent::Parts(parts) = msg.content_mut() else {
        return;
    };
    for part in parts {
        match part {
            ContentPart::ImageUrl { image_url }
                if image_url.url.starts_with("data:") =>
            {
                image_url.url = IMAGE_PLACEHOLDER.to_owned();
            }
            ContentPart::InputAudio { input_audio } => {
                input_audio.data = AUDIO_PLACEHOLDER.to_owned();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toolchat_model::ToolCall;

    use super::*;
    use crate::store::ConversationStore;

    fn sample_store() -> ConversationStore {
        let call = ToolCall::function(
            "t1",
            "calculate",
            r#"{"expression":"2+2"}"#,
        );
        let store = ConversationStore::new();
        store.append(DisplayMessage::notice("welcome"));
        store.append(DisplayMessage::text(Author::User, "2+2?"));
        store.append(
            DisplayMessage::text(Author::Assistant, "Call: calculate")
                .with_metadata(|metadata| {
                    metadata.tool_calls = Some(vec![call]);
                }),
        );
        store.append(
            DisplayMessage::text(Author::Assistant, "Tool Result:\n4")
                .with_metadata(|metadata| {
                    metadata.tool_message = Some(WireMessage::tool("t1", "4"));
                }),
        );
        store.append(DisplayMessage::text(Author::Assistant, "It is 4."));
        store
    }

    #[test]
    fn test_to_wire() {
        let store = sample_store();
        let wire = to_wire(store.snapshot().messages(), "S");
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!([
                { "role": "system", "content": "S" },
                { "role": "user", "content": "2+2?" },
                {
                    "role": "assistant",
                    "content": "Call: calculate",
                    "tool_calls": [{
                        "id": "t1",
                        "type": "function",
                        "function": {
                            "name": "calculate",
                            "arguments": "{\"expression\":\"2+2\"}"
                        }
                    }]
                },
                { "role": "tool", "tool_call_id": "t1", "content": "4" },
                { "role": "assistant", "content": "It is 4." }
            ])
        );

        // Idempotent on an unchanged store.
        assert_eq!(wire, to_wire(store.snapshot().messages(), "S"));
    }

    #[test]
    fn test_to_wire_uses_live_prompt_and_skips_placeholders() {
        let store = ConversationStore::new();
        store.append(DisplayMessage::text(Author::User, "hi"));
        store.append(DisplayMessage::text(Author::Assistant, ""));
        store.append(DisplayMessage {
            kind: MessageKind::Other,
            ..DisplayMessage::text(Author::User, "voice memo")
        });
        store.append(DisplayMessage::image(Author::User, "file:///cat.png"));

        let wire = to_wire(store.snapshot().messages(), "new prompt");
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0], WireMessage::system("new prompt"));
        assert_eq!(wire[1], WireMessage::user("hi"));
        assert_eq!(
            wire[2].content(),
            &MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "file:///cat.png".to_owned()
                }
            }])
        );
    }

    #[test]
    fn test_round_trip() {
        let store = sample_store();
        let wire = to_wire(store.snapshot().messages(), "S");
        let restored = from_wire(&wire);

        // The welcome notice and the system entry do not survive.
        assert_eq!(restored.len(), 4);
        assert_eq!(to_wire_chronological(&restored), wire);
        assert_eq!(
            restored[1].metadata.tool_calls.as_ref().unwrap()[0].id,
            "t1"
        );
        assert!(restored[2].metadata.tool_result);
        assert_eq!(restored[2].metadata.tool_call_id.as_deref(), Some("t1"));
        assert_eq!(restored[2].text_or_empty(), "Tool Result: 4");
    }

    fn to_wire_chronological(messages: &[DisplayMessage]) -> Vec<WireMessage> {
        let newest_first: Vec<_> = messages.iter().rev().cloned().collect();
        to_wire(&newest_first, "S")
    }

    #[test]
    fn test_from_wire_expands_parts() {
        let call = ToolCall::function("c1", "get_weather", "{}");
        let wire = vec![WireMessage::Assistant {
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "Look:".to_owned(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".to_owned(),
                    },
                },
            ]),
            tool_calls: vec![call.clone()],
            reasoning_content: Some("Need a look.".to_owned()),
        }];
        let messages = from_wire(&wire);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::Text);
        assert_eq!(messages[1].kind, MessageKind::Image);
        assert_eq!(
            messages[1].media_ref.as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert_eq!(messages[0].metadata.reasoning.as_deref(), Some("Need a look."));
        assert_eq!(messages[1].metadata.reasoning, None);
        for msg in &messages {
            assert_eq!(msg.author, Author::Assistant);
            assert_eq!(msg.metadata.tool_calls, Some(vec![call.clone()]));
        }
    }

    #[test]
    fn test_parse_import() {
        let imported = parse_import(
            r#"[{"role":"system","content":"S"},{"role":"user","content":"hi"}]"#,
        )
        .unwrap();
        assert_eq!(imported.system_prompt.as_deref(), Some("S"));
        assert_eq!(imported.messages.len(), 1);
        assert_eq!(imported.messages[0].author, Author::User);
        assert_eq!(imported.messages[0].text_or_empty(), "hi");
        assert!(imported.messages[0].metadata.imported);

        let imported = parse_import(
            r#"[{"role":"system","content":[{"type":"text","text":"P"}]}]"#,
        )
        .unwrap();
        assert_eq!(imported.system_prompt.as_deref(), Some("P"));
        assert!(imported.messages.is_empty());
    }

    #[test]
    fn test_parse_import_errors() {
        assert!(matches!(parse_import("[{"), Err(ImportError::Json(_))));
        assert!(matches!(
            parse_import(r#"{"role":"user","content":"hi"}"#),
            Err(ImportError::NotAnArray)
        ));
        assert!(matches!(
            parse_import(r#"[{"role":"user","content":"hi"},{"role":"bot"}]"#),
            Err(ImportError::InvalidMessage { index: 1, .. })
        ));
        assert!(matches!(
            parse_import(r#"[{"role":"tool","content":"4"}]"#),
            Err(ImportError::InvalidMessage { index: 0, .. })
        ));
        assert!(matches!(
            parse_import(
                r#"[{"role":"user","content":"hi","tool_calls":[]}]"#
            ),
            Err(ImportError::InvalidMessage { index: 0, .. })
        ));
    }

    #[test]
    fn test_parse_import_checks_tool_call_ids() {
        let err = parse_import(
            r#"[{"role":"user","content":"hi"},{"role":"tool","tool_call_id":"ghost","content":"4"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidMessage { index: 1, .. }));
        assert!(err.to_string().contains("ghost"));

        // A result may not come before its call.
        assert!(matches!(
            parse_import(
                r#"[
                    {"role":"tool","tool_call_id":"t1","content":"4"},
                    {"role":"assistant","content":null,"tool_calls":[
                        {"id":"t1","type":"function","function":{"name":"calculate","arguments":"{}"}}
                    ]}
                ]"#
            ),
            Err(ImportError::InvalidMessage { index: 0, .. })
        ));

        let imported = parse_import(
            r#"[
                {"role":"user","content":"2+2?"},
                {"role":"assistant","content":null,"tool_calls":[
                    {"id":"t1","type":"function","function":{"name":"calculate","arguments":"{}"}}
                ]},
                {"role":"tool","tool_call_id":"t1","content":"4"}
            ]"#,
        )
        .unwrap();
        assert_eq!(imported.wire.len(), 3);
    }

    #[test]
    fn test_reasoning_round_trip() {
        let store = ConversationStore::new();
        store.append(DisplayMessage::text(Author::User, "2+2?"));
        store.append(
            DisplayMessage::text(Author::Assistant, "4").with_metadata(
                |metadata| metadata.reasoning = Some("Two plus two.".to_owned()),
            ),
        );

        let wire = to_wire(store.snapshot().messages(), "S");
        assert_eq!(
            serde_json::to_value(&wire[2]).unwrap(),
            json!({
                "role": "assistant",
                "content": "4",
                "reasoning_content": "Two plus two."
            })
        );
        let restored = from_wire(&wire);
        assert_eq!(
            restored[1].metadata.reasoning.as_deref(),
            Some("Two plus two.")
        );
    }

    #[test]
    fn test_export_redaction() {
        let store = ConversationStore::new();
        store.append(DisplayMessage::image(
            Author::User,
            "data:image/png;base64,AAAA",
        ));

        let redacted =
            export(store.snapshot().messages(), "S", Redaction::Redacted)
                .unwrap();
        assert!(redacted.contains(IMAGE_PLACEHOLDER));
        assert!(!redacted.contains("AAAA"));

        let full =
            export(store.snapshot().messages(), "S", Redaction::Full).unwrap();
        assert!(full.contains("data:image/png;base64,AAAA"));

        let mut audio = WireMessage::User {
            content: MessageContent::Parts(vec![ContentPart::InputAudio {
                input_audio: toolchat_model::InputAudio {
                    data: "UklGR".to_owned(),
                    format: "wav".to_owned(),
                },
            }]),
        };
        redact(&mut audio);
        assert!(serde_json::to_string(&audio).unwrap().contains(AUDIO_PLACEHOLDER));
    }
}
