use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};

use crate::ToolCall;
use crate::engine::EngineError;

/// A streaming response from the completion engine.
pub trait CompletionResponse: Sized + Send + 'static {
    /// The error type that may be returned by the engine.
    type Error: EngineError;

    /// Attempts to pull out the next event from the response.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct response state:
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next event. Implementations will ensure that the current
    ///   task will be notified when the next event may be ready.
    /// - `Poll::Ready(Ok(Some(event)))` means the response has an event
    ///   to deliver, and may produce further events on subsequent
    ///   `poll_next_event` calls.
    /// - `Poll::Ready(Ok(None))` means the response has completed.
    /// - `Poll::Ready(Err(error))` means an error occurred while
    ///   processing the response.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<CompletionEvent>, Self::Error>>;

    /// Returns the authoritative final content of the response, if the
    /// engine post-processes the generated text (for example, to strip
    /// tool-call markup out of it).
    ///
    /// You should call this method after polling all events from this
    /// response. `None` means the concatenated tokens are the content.
    fn final_content(&self) -> Option<String> {
        None
    }
}

/// The reason why a completion has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishReason {
    /// The model needs to call tools.
    ToolCalls,
    /// The model has finished generating text.
    Stop,
    /// The generation was stopped before the model finished.
    Interrupted,
}

/// The event from a completion response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionEvent {
    /// The response has been completed.
    Completed(FinishReason),
    /// Received a token (text delta).
    Token(String),
    /// Received a reasoning (thinking) delta, kept apart from the answer.
    Reasoning(String),
    /// Received a complete tool call request.
    ToolCall(ToolCall),
}

/// A settled completion, assembled from the events of a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompletionResult {
    /// The final content. Only authoritative when not `interrupted`.
    pub content: String,
    /// Tool calls requested by the model, in emission order.
    pub tool_calls: Vec<ToolCall>,
    /// Whether the generation was stopped before it finished.
    pub interrupted: bool,
    /// The raw text generated so far.
    pub text: String,
    /// The reasoning received so far, empty if the engine sent none.
    pub reasoning: String,
}

impl CompletionResult {
    /// Returns the text that should be shown for this completion: the
    /// partial buffer when interrupted, otherwise the content.
    #[inline]
    pub fn display_text(&self) -> &str {
        if self.interrupted {
            &self.text
        } else {
            &self.content
        }
    }
}
