use std::time::Duration;

use toolchat_core::tool::{Tool, ToolApproval};
use toolchat_core::{Chat, ChatBuilder, TurnError};
use toolchat_model::CompletionEngine;

use crate::tools::*;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    chat_builder: ChatBuilder,
}

impl SessionBuilder {
    /// Creates a session builder with a specified completion engine.
    ///
    /// The built-in tools (`calculate`, `get_weather` and `get_time`) are
    /// registered up front. Tools added later with the same name replace
    /// them.
    pub fn with_engine<E: CompletionEngine + 'static>(engine: E) -> Self {
        let chat_builder = ChatBuilder::with_engine(engine)
            .with_tool(CalculateTool::new())
            .with_tool(CannedTool::get_weather())
            .with_tool(CannedTool::get_time());
        Self { chat_builder }
    }

    /// Sets the system prompt for the chat.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.chat_builder = self.chat_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the welcome message, `None` to start with an empty conversation.
    #[inline]
    pub fn with_welcome_message<S: Into<String>>(
        mut self,
        message: Option<S>,
    ) -> Self {
        self.chat_builder = self.chat_builder.with_welcome_message(message);
        self
    }

    /// Limits the tool-call rounds of a single turn, `None` for no limit.
    #[inline]
    pub fn with_max_tool_rounds(mut self, rounds: Option<usize>) -> Self {
        self.chat_builder = self.chat_builder.with_max_tool_rounds(rounds);
        self
    }

    /// Sets how long failed requests are retried when the engine reports
    /// a transient error.
    #[inline]
    pub fn with_retry_budget(mut self, budget: Option<Duration>) -> Self {
        self.chat_builder = self.chat_builder.with_retry_budget(budget);
        self
    }

    /// Adds a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.chat_builder = self.chat_builder.with_tool(tool);
        self
    }

    /// Attaches a callback to be invoked when the session is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.chat_builder = self.chat_builder.on_idle(on_idle);
        self
    }

    /// Attaches a callback to be invoked when a turn fails.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&TurnError) + Send + Sync + 'static,
    ) -> Self {
        self.chat_builder = self.chat_builder.on_error(on_error);
        self
    }

    /// Attaches a callback to be invoked when a tool call needs approval.
    #[inline]
    pub fn on_tool_call_request(
        mut self,
        on_tool_call_request: impl Fn(ToolApproval) + Send + Sync + 'static,
    ) -> Self {
        self.chat_builder = self.chat_builder.on_confirm(on_tool_call_request);
        self
    }

    /// Builds a new session.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> Session {
        Session {
            chat: self.chat_builder.build(),
        }
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured chat that you can use directly, and it
/// is basically a wrapper around [`Chat`].
pub struct Session {
    chat: Chat,
}

impl Session {
    /// Sends a message to the session.
    #[inline]
    pub fn send_message(&self, message: &str) -> Result<(), TurnError> {
        self.chat.send(message)
    }

    /// Returns the underlying chat, for everything beyond sending messages.
    #[inline]
    pub fn chat(&self) -> &Chat {
        &self.chat
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.chat.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::watch;
    use tokio::time::timeout;
    use toolchat_model::ToolCall;
    use toolchat_test_engine::{PresetEvent, PresetResponse, TestEngine};

    use super::*;

    #[tokio::test]
    async fn test_builtin_calculate() {
        let mut engine = TestEngine::default();
        engine.add_assistant_step(PresetResponse::with_events([
            PresetEvent::ToolCall(ToolCall::function(
                "call_1",
                "calculate",
                r#"{"expression":"(1 + 2) * 4"}"#,
            )),
        ]));
        engine.add_assistant_step(PresetResponse::with_text("It is 12."));

        let (idle_tx, mut idle_rx) = watch::channel(false);
        let session = SessionBuilder::with_engine(engine.clone())
            .with_welcome_message(None::<String>)
            .on_idle(move || {
                idle_tx.send_replace(true);
            })
            .build();
        session.send_message("What is (1 + 2) * 4?").unwrap();
        timeout(Duration::from_secs(2), idle_rx.wait_for(|idle| *idle))
            .await
            .unwrap()
            .unwrap();

        let texts = session
            .chat()
            .messages()
            .messages()
            .iter()
            .rev()
            .map(|msg| msg.text_or_empty().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(texts[2], "Tool Result:\n12");
        assert_eq!(texts.last().unwrap(), "It is 12.");

        let tools = &engine.requests()[0].options.tools;
        let names = tools.iter().map(|t| t.name()).collect::<Vec<_>>();
        assert_eq!(names, ["calculate", "get_weather", "get_time"]);
    }
}
