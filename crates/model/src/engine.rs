use std::error::Error;
use std::future::ready;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chat_template;
use crate::error::ErrorKind;
use crate::request::{CompletionOptions, CompletionRequest};
use crate::response::CompletionResponse;
use crate::wire::WireMessage;

/// The error type for a completion engine.
pub trait EngineError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A prompt rendered from a message list, for previews.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedChat {
    /// The exact prompt text the engine would be fed.
    pub prompt: String,
}

/// The outcome of restoring an engine session snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionLoaded {
    /// Number of tokens restored into the engine state.
    pub tokens_loaded: usize,
}

/// A type that represents a completion engine, which is an entry for
/// running completions over a wire-format message list.
///
/// Once the engine is created, it should behave like a stateless object.
/// It can still have internal state (a loaded model, a KV cache), but
/// callers should not rely on it, and the engine should be prepared for
/// being dropped anytime.
pub trait CompletionEngine: Send + Sync {
    /// The error type that may be returned by the engine.
    type Error: EngineError;

    /// The response type for this engine.
    type Response: CompletionResponse<Error = Self::Error>;

    /// Sends a completion request to the engine.
    ///
    /// Fails with an engine-defined error when the underlying context is
    /// unavailable or the inputs are malformed.
    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Interrupts in-flight responses, best-effort.
    ///
    /// Interrupted responses should complete with
    /// [`FinishReason::Interrupted`](crate::FinishReason::Interrupted).
    fn stop(&self);

    /// Renders the prompt that the given messages would produce.
    ///
    /// This is purely informational and has no effect on the engine state.
    /// The default implementation renders a ChatML prompt locally.
    fn format_chat(
        &self,
        messages: &[WireMessage],
        options: &CompletionOptions,
    ) -> impl Future<Output = Result<FormattedChat, Self::Error>> + Send + 'static
    {
        let prompt = chat_template::render_chatml(messages, options);
        ready(Ok(FormattedChat { prompt }))
    }
}

/// An engine whose internal state can be snapshotted to disk and restored.
///
/// The snapshot format is opaque and owned by the engine.
pub trait EngineSession: CompletionEngine {
    /// Writes the engine state to `path`, returning the number of tokens
    /// written.
    fn save_session(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'static;

    /// Restores the engine state from `path`.
    fn load_session(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<SessionLoaded, Self::Error>> + Send + 'static;
}
