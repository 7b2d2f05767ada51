use std::error::Error as StdError;
use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use thiserror::Error;
use tokio::select;
use tokio_util::sync::CancellationToken;
use toolchat_model::{
    CompletionEngine, CompletionEvent, CompletionOptions, CompletionRequest,
    CompletionResponse, CompletionResult, EngineError, ErrorKind,
    FinishReason, FormattedChat, ToolChoice, ToolDefinition, WireMessage,
};
use tracing::Instrument;

/// An engine error with its concrete type erased.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct EngineFailure {
    kind: ErrorKind,
    source: Box<dyn StdError + Send + Sync>,
}

impl EngineFailure {
    fn new<E: EngineError>(err: E) -> Self {
        Self {
            kind: err.kind(),
            source: Box::new(err),
        }
    }
}

impl EngineError for EngineFailure {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A token delivered while a completion is streaming.
#[derive(Clone, Copy, Debug)]
pub struct StreamedToken<'a> {
    /// The newly received text.
    pub delta: &'a str,
    /// All text received so far, including `delta`.
    pub accumulated: &'a str,
}

pub(crate) type OnToken = Box<dyn FnMut(StreamedToken<'_>) + Send>;

type RunResult = Result<CompletionResult, EngineFailure>;
type BoxedRunFuture = Pin<Box<dyn Future<Output = RunResult> + Send>>;
type BoxedFormatFuture =
    Pin<Box<dyn Future<Output = Result<FormattedChat, EngineFailure>> + Send>>;
#[rustfmt::skip]
type RunFn = Arc<
    dyn Fn(CompletionRequest, OnToken, CancellationToken, Option<Duration>)
        -> BoxedRunFuture + Send + Sync
>;
type StopFn = Arc<dyn Fn() + Send + Sync>;
#[rustfmt::skip]
type FormatFn = Arc<
    dyn Fn(Vec<WireMessage>, CompletionOptions) -> BoxedFormatFuture
        + Send + Sync
>;

/// A wrapper around a completion engine that drives one request/stream
/// cycle at a time and provides a type-erased interface for the other
/// modules.
#[derive(Clone)]
pub struct Orchestrator {
    run_fn: RunFn,
    stop_fn: StopFn,
    format_fn: FormatFn,
    options: CompletionOptions,
    retry_budget: Option<Duration>,
}

impl Orchestrator {
    pub fn new<E: CompletionEngine + 'static>(engine: E) -> Self {
        // We have to erase the type `E`, since `Orchestrator` doesn't have a
        // generic parameter and we don't want it either.
        let engine = Arc::new(engine);

        let run_fn: RunFn = {
            let engine = Arc::clone(&engine);
            Arc::new(move |req, on_token, cancel, retry_budget| {
                let engine = Arc::clone(&engine);
                Box::pin(
                    async move {
                        trace!("got a request: {req:?}");
                        run_request(engine, req, on_token, cancel, retry_budget)
                            .await
                    }
                    .instrument(trace_span!("completion req")),
                )
            })
        };
        let stop_fn: StopFn = {
            let engine = Arc::clone(&engine);
            Arc::new(move || engine.stop())
        };
        let format_fn: FormatFn = Arc::new(move |messages, options| {
            let fut = engine.format_chat(&messages, &options);
            Box::pin(async move { fut.await.map_err(EngineFailure::new) })
        });

        Self {
            run_fn,
            stop_fn,
            format_fn,
            options: CompletionOptions::default(),
            retry_budget: None,
        }
    }

    /// Sets the options (temperature, token limit, ...) used as the base of
    /// every request. Tools and tool choice are filled in per run.
    #[inline]
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Retries transient engine failures (rate limits) until `budget` has
    /// elapsed. `None` disables retrying.
    #[inline]
    pub fn with_retry_budget(mut self, budget: Option<Duration>) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Runs one completion over `messages` with `tools` available.
    ///
    /// Tokens are reported through `on_token` as they arrive. Cancelling
    /// `cancel` stops the engine and settles the result as interrupted.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn run(
        &self,
        messages: Vec<WireMessage>,
        tools: Vec<ToolDefinition>,
        on_token: impl FnMut(StreamedToken<'_>) + Send + 'static,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, EngineFailure> {
        let tool_choice = if tools.is_empty() {
            None
        } else {
            Some(ToolChoice::Auto)
        };
        let req = CompletionRequest {
            messages,
            options: CompletionOptions {
                tools,
                tool_choice,
                ..self.options.clone()
            },
        };
        (self.run_fn)(req, Box::new(on_token), cancel.clone(), self.retry_budget)
            .await
    }

    /// Interrupts in-flight completions, if any.
    #[inline]
    pub fn stop(&self) {
        (self.stop_fn)();
    }

    /// Renders the prompt the engine would see for `messages`.
    pub async fn format_chat(
        &self,
        messages: Vec<WireMessage>,
    ) -> Result<FormattedChat, EngineFailure> {
        (self.format_fn)(messages, self.options.clone()).await
    }
}

async fn run_request<E: CompletionEngine>(
    engine: Arc<E>,
    req: CompletionRequest,
    mut on_token: OnToken,
    cancel: CancellationToken,
    retry_budget: Option<Duration>,
) -> RunResult {
    let resp_or_err = select! {
        biased;

        _ = cancel.cancelled() => {
            debug!("cancelled before the response started");
            engine.stop();
            return Ok(CompletionResult {
                interrupted: true,
                ..Default::default()
            });
        }
        resp_or_err = send_request(&*engine, &req, retry_budget) => resp_or_err,
    };
    let resp = resp_or_err.map_err(|err| {
        error!("got an error: {err:?}");
        EngineFailure::new(err)
    })?;

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();
    let mut interrupted = false;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err = select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("cancelled while streaming");
                engine.stop();
                interrupted = true;
                break;
            }
            event_or_err = poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)) => {
                event_or_err
            }
        };
        let event = event_or_err.map_err(|err| {
            error!("got an error: {err:?}");
            EngineFailure::new(err)
        })?;

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            CompletionEvent::Token(delta) => {
                text.push_str(&delta);
                on_token(StreamedToken {
                    delta: &delta,
                    accumulated: &text,
                });
            }
            CompletionEvent::Reasoning(delta) => {
                reasoning.push_str(&delta);
            }
            CompletionEvent::ToolCall(call) => {
                tool_calls.push(call);
            }
            CompletionEvent::Completed(FinishReason::Interrupted) => {
                interrupted = true;
            }
            CompletionEvent::Completed(_) => {}
        }
    }

    trace!("finished a request");

    let content = if interrupted {
        text.clone()
    } else {
        pinned_resp.final_content().unwrap_or_else(|| text.clone())
    };
    Ok(CompletionResult {
        content,
        tool_calls,
        interrupted,
        text,
        reasoning,
    })
}

async fn send_request<E: CompletionEngine>(
    engine: &E,
    req: &CompletionRequest,
    retry_budget: Option<Duration>,
) -> Result<E::Response, E::Error> {
    let Some(budget) = retry_budget else {
        return engine.send_request(req).await;
    };

    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_elapsed_time(Some(budget))
        .build();
    backoff::future::retry(policy, || {
        let fut = engine.send_request(req);
        async move {
            fut.await.map_err(|err| {
                if err.kind().is_transient() {
                    warn!("transient error, will retry: {err}");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    })
    .await
}
