//! A local scripted engine for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Sleep, sleep};
use toolchat_model::{
    CompletionEngine, CompletionEvent, CompletionRequest, CompletionResponse,
    EngineError, EngineSession, ErrorKind, FinishReason, Role, SessionLoaded,
    chat_template,
};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl EngineError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[derive(Default)]
struct Shared {
    attempts: Mutex<HashMap<usize, u64>>,
    requests: Mutex<Vec<CompletionRequest>>,
    stop_epoch: AtomicU64,
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TestResponse {
    preset: PresetResponse,
    shared: Arc<Shared>,
    epoch: u64,
    delay: Duration,
    event_idx: usize,
    done: bool,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TestResponse {
    #[inline]
    fn is_stopped(&self) -> bool {
        self.shared.stop_epoch.load(Ordering::SeqCst) != self.epoch
    }
}

impl CompletionResponse for TestResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<CompletionEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.done {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }
        if this.is_stopped() {
            this.done = true;
            return Poll::Ready(Ok(Some(CompletionEvent::Completed(
                FinishReason::Interrupted,
            ))));
        }

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            if let Some(preset_event) = this.preset.events.get(this.event_idx)
            {
                let event = match preset_event {
                    PresetEvent::Token(token) => {
                        CompletionEvent::Token(token.clone())
                    }
                    PresetEvent::Reasoning(delta) => {
                        CompletionEvent::Reasoning(delta.clone())
                    }
                    PresetEvent::ToolCall(call) => {
                        CompletionEvent::ToolCall(call.clone())
                    }
                };
                this.event_idx += 1;
                return Poll::Ready(Ok(Some(event)));
            }

            this.done = true;
            let reason = if this.preset.has_tool_calls() {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            };
            return Poll::Ready(Ok(Some(CompletionEvent::Completed(reason))));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }

    fn final_content(&self) -> Option<String> {
        self.preset.content.clone()
    }
}

/// A local fake engine for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the engine should respond to a request. The response is selected
/// by the number of assistant messages already in the request, so the first
/// step answers a fresh conversation, the second step answers a conversation
/// with one assistant turn, and so on. If there are no enough steps in the
/// script, an error will be returned.
///
/// Clones share the request log, the failure counters and the stop signal.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestEngine {
    script: Vec<PresetResponse>,
    delay: Option<Duration>,
    shared: Arc<Shared>,
}

impl TestEngine {
    #[inline]
    pub fn add_assistant_step(&mut self, preset: PresetResponse) {
        self.script.push(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.shared.requests).clone()
    }
}

impl CompletionEngine for TestEngine {
    type Error = crate::Error;
    type Response = TestResponse;

    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        lock(&self.shared.requests).push(req.clone());
        let step_idx = req
            .messages
            .iter()
            .filter(|msg| msg.role() == Role::Assistant)
            .count();

        let result = 'blk: {
            let Some(preset) = self.script.get(step_idx) else {
                break 'blk Err(Error::new("no enough steps", ErrorKind::Other));
            };

            if let Some(failures) = preset.failures {
                let mut attempts = lock(&self.shared.attempts);
                let attempt = attempts.entry(step_idx).or_default();
                *attempt += 1;
                if failures == 0 || *attempt <= failures {
                    break 'blk Err(Error::new(
                        format!("simulated failure #{attempt}"),
                        preset.failure_kind,
                    ));
                }
            }

            Ok(TestResponse {
                preset: preset.clone(),
                shared: Arc::clone(&self.shared),
                epoch: self.shared.stop_epoch.load(Ordering::SeqCst),
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                event_idx: 0,
                done: false,
                sleep: None,
            })
        };
        std::future::ready(result)
    }

    fn stop(&self) {
        self.shared.stop_epoch.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    prompt: String,
    tokens: usize,
}

impl EngineSession for TestEngine {
    fn save_session(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'static {
        let prompt = lock(&self.shared.requests)
            .last()
            .map(|req| {
                chat_template::render_chatml(&req.messages, &req.options)
            })
            .unwrap_or_default();
        let snapshot = SessionSnapshot {
            tokens: prompt.split_whitespace().count(),
            prompt,
        };
        let path = path.to_owned();
        async move {
            let data = serde_json::to_vec(&snapshot)
                .map_err(|err| Error::new(err.to_string(), ErrorKind::Other))?;
            tokio::fs::write(&path, data)
                .await
                .map_err(|err| Error::new(err.to_string(), ErrorKind::Other))?;
            Ok(snapshot.tokens)
        }
    }

    fn load_session(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<SessionLoaded, Self::Error>> + Send + 'static
    {
        let path = path.to_owned();
        async move {
            let data = tokio::fs::read(&path).await.map_err(|err| {
                Error::new(err.to_string(), ErrorKind::ContextUnavailable)
            })?;
            let snapshot: SessionSnapshot = serde_json::from_slice(&data)
                .map_err(|err| {
                    Error::new(err.to_string(), ErrorKind::InvalidInput)
                })?;
            Ok(SessionLoaded {
                tokens_loaded: snapshot.tokens,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use toolchat_model::{
        CompletionOptions, ToolCall, ToolChoice, ToolDefinition, WireMessage,
    };
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestResponse,
    ) -> (String, Vec<ToolCall>, FinishReason, Option<String>) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_calls = vec![];
        loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                CompletionEvent::Completed(reason) => {
                    return (msg, tool_calls, reason, resp.final_content());
                }
                CompletionEvent::Token(delta) => msg.push_str(&delta),
                CompletionEvent::Reasoning(_) => {}
                CompletionEvent::ToolCall(call) => tool_calls.push(call),
            }
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut engine = TestEngine::default();
        engine.add_assistant_step(PresetResponse::with_events([
            PresetEvent::Token("Hello, ".to_owned()),
            PresetEvent::Token("world!".to_owned()),
        ]));
        engine.add_assistant_step(
            PresetResponse::with_events([
                PresetEvent::Token("Sure, ".to_owned()),
                PresetEvent::Token("let me take a look.".to_owned()),
                PresetEvent::ToolCall(ToolCall::function(
                    "tool:1",
                    "get_weather",
                    r#"{"location":"Paris"}"#,
                )),
            ])
            .with_content(""),
        );

        let mut req = CompletionRequest {
            messages: vec![
                WireMessage::system("S"),
                WireMessage::user("Hi"),
            ],
            options: CompletionOptions {
                tools: vec![ToolDefinition::function(
                    "get_weather",
                    "Get current weather information for a location",
                    json!({
                        "type": "object",
                        "properties": {
                            "location": { "type": "string" }
                        }
                    }),
                )],
                tool_choice: Some(ToolChoice::Auto),
                ..Default::default()
            },
        };
        let resp = engine.send_request(&req).await.unwrap();
        let (msg, tool_calls, reason, content) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert!(tool_calls.is_empty());
        assert_eq!(reason, FinishReason::Stop);
        assert_eq!(content, None);

        req.messages.push(WireMessage::assistant(msg, vec![]));
        req.messages.push(WireMessage::user("Weather in Paris?"));
        let resp = engine.send_request(&req).await.unwrap();
        let (msg, tool_calls, reason, content) = collect_response(resp).await;
        assert_eq!(msg, "Sure, let me take a look.");
        assert_eq!(reason, FinishReason::ToolCalls);
        assert_eq!(content.as_deref(), Some(""));
        assert_eq!(tool_calls[0].function.name, "get_weather");

        assert_eq!(engine.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failures() {
        let mut engine = TestEngine::default();
        engine.add_assistant_step(
            PresetResponse::with_text("ok")
                .with_failures(2)
                .with_failure_kind(ErrorKind::RateLimitExceeded),
        );
        let req = CompletionRequest {
            messages: vec![WireMessage::user("Hi")],
            options: CompletionOptions::default(),
        };

        for _ in 0..2 {
            let err = engine.send_request(&req).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        assert!(engine.send_request(&req).await.is_ok());

        // Out of script.
        let req = CompletionRequest {
            messages: vec![WireMessage::assistant("ok", vec![])],
            options: CompletionOptions::default(),
        };
        let err = engine.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_stop() {
        let mut engine = TestEngine::default();
        engine.add_assistant_step(PresetResponse::with_text("a b c d"));
        let req = CompletionRequest {
            messages: vec![WireMessage::user("Hi")],
            options: CompletionOptions::default(),
        };
        let resp = engine.send_request(&req).await.unwrap();
        let mut resp = pin!(resp);
        let first = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap();
        assert_eq!(first, Some(CompletionEvent::Token("a ".to_owned())));

        engine.stop();
        let next = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap();
        assert_eq!(
            next,
            Some(CompletionEvent::Completed(FinishReason::Interrupted))
        );
        let next = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap();
        assert_eq!(next, None);

        // Responses created after the stop are not affected.
        let resp = engine.send_request(&req).await.unwrap();
        let (msg, _, reason, _) = collect_response(resp).await;
        assert_eq!(msg, "a b c d");
        assert_eq!(reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn test_session_snapshot() {
        let mut engine = TestEngine::default();
        engine.add_assistant_step(PresetResponse::with_text("ok"));
        let req = CompletionRequest {
            messages: vec![WireMessage::user("Hello there")],
            options: CompletionOptions::default(),
        };
        engine.send_request(&req).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");
        let written = engine.save_session(&path).await.unwrap();
        assert!(written > 0);

        let loaded = engine.load_session(&path).await.unwrap();
        assert_eq!(loaded.tokens_loaded, written);

        let err = engine
            .load_session(&dir.path().join("missing.bin"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContextUnavailable);
    }
}
