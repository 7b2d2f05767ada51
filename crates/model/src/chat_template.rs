//! A minimal ChatML renderer for prompt previews.
//!
//! Real engines usually apply the model's own chat template. This module
//! renders the generic ChatML layout so that engines without a template
//! (or without local tokenization at all) can still show what a message
//! list looks like as a prompt.

use std::fmt::Write as _;

use crate::{
    CompletionOptions, ContentPart, MessageContent, ToolChoice, WireMessage,
};

/// The marker substituted for media parts.
pub const MEDIA_MARKER: &str = "<__media__>";

/// Renders `messages` as a ChatML prompt, ending with an open assistant
/// turn for the model to complete.
///
/// Tool definitions are appended to the first system message (a system
/// message is synthesized if there is none), unless the tool choice is
/// [`ToolChoice::None`].
pub fn render_chatml(
    messages: &[WireMessage],
    options: &CompletionOptions,
) -> String {
    let tools_block = render_tools(options);
    let mut prompt = String::new();
    let mut tools_pending = tools_block.is_some();

    if tools_pending
        && !matches!(messages.first(), Some(WireMessage::System { .. }))
    {
        push_turn(&mut prompt, "system", tools_block.as_deref().unwrap_or(""));
        tools_pending = false;
    }

    for msg in messages {
        let mut body = render_content(msg.content());
        match msg {
            WireMessage::System { .. } if tools_pending => {
                if let Some(block) = &tools_block {
                    if !body.is_empty() {
                        body.push_str("\n\n");
                    }
                    body.push_str(block);
                }
                tools_pending = false;
            }
            WireMessage::Assistant { tool_calls, .. } => {
                for call in tool_calls {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    let _ = write!(
                        body,
                        "<tool_call>\n{{\"name\": \"{}\", \"arguments\": {}}}\n</tool_call>",
                        call.function.name,
                        if call.function.arguments.is_empty() {
                            "{}"
                        } else {
                            call.function.arguments.as_str()
                        }
                    );
                }
            }
            WireMessage::Tool { .. } => {
                body = format!("<tool_response>\n{body}\n</tool_response>");
            }
            _ => {}
        }
        push_turn(&mut prompt, msg.role().as_str(), &body);
    }

    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn render_tools(options: &CompletionOptions) -> Option<String> {
    if options.tools.is_empty() || options.tool_choice == Some(ToolChoice::None)
    {
        return None;
    }
    let mut block = String::from("# Tools\n\n<tools>\n");
    for tool in &options.tools {
        let json = serde_json::to_string(tool).unwrap_or_default();
        block.push_str(&json);
        block.push('\n');
    }
    block.push_str("</tools>");
    Some(block)
}

fn render_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => {
            let mut rendered = String::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => rendered.push_str(text),
                    ContentPart::ImageUrl { .. }
                    | ContentPart::InputAudio { .. } => {
                        rendered.push_str(MEDIA_MARKER);
                    }
                }
            }
            rendered
        }
    }
}

#[inline]
fn push_turn(prompt: &mut String, role: &str, body: &str) {
    let _ = write!(prompt, "<|im_start|>{role}\n{body}<|im_end|>\n");
}
