use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use toolchat_model::{
    CompletionEvent, CompletionResponse, ErrorKind, FinishReason, ToolCall,
};

use crate::Error;
use crate::io::Sse;
use crate::proto::{self, ChatCompletionChunk};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // Text that arrived in the same chunk as a reasoning delta.
    pending_token: Option<String>,
    // Tool call fragments, patched by index until the stream finishes.
    tool_calls: Vec<proto::ToolCall>,
    // Assembled tool calls that are not yet sent to the caller.
    pending_tool_calls: VecDeque<ToolCall>,
    // This field will be cleared after the response returns the complete event.
    pending_finish_reason: Option<FinishReason>,
    finished: bool,
}

impl PartialState {
    /// Assembles the tool calls and queues the finish event. Arguments may
    /// arrive in many fragments, so calls are only emitted from here.
    fn finish(&mut self, finish_reason: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut fragments = std::mem::take(&mut self.tool_calls);
        fragments.sort_by_key(|t| t.index);
        self.pending_tool_calls = fragments
            .into_iter()
            .map(|t| {
                let function = t.function.unwrap_or(proto::FunctionToolCall {
                    name: None,
                    arguments: None,
                });
                ToolCall::function(
                    t.id.unwrap_or_default(),
                    function.name.unwrap_or_default(),
                    function.arguments.unwrap_or_default(),
                )
            })
            .collect();

        // Some servers report `stop` even when they emitted tool calls.
        let reason = if finish_reason == Some("tool_calls")
            || !self.pending_tool_calls.is_empty()
        {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        self.pending_finish_reason = Some(reason);
    }

    fn patch_tool_call(&mut self, tool_call: proto::ToolCall) {
        let Some(partial_tool_call) = self
            .tool_calls
            .iter_mut()
            .find(|t| t.index == tool_call.index)
        else {
            self.tool_calls.push(tool_call);
            return;
        };
        if let Some(id) = tool_call.id {
            partial_tool_call.id.get_or_insert_default().push_str(&id);
        }
        if let Some(function) = tool_call.function {
            match partial_tool_call.function {
                Some(ref mut partial_func) => {
                    if let Some(name) = function.name {
                        partial_func
                            .name
                            .get_or_insert_default()
                            .push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial_func
                            .arguments
                            .get_or_insert_default()
                            .push_str(&arguments);
                    }
                }
                None => partial_tool_call.function = Some(function),
            }
        }
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<CompletionEvent>, PartialState), Error>;

pin_project! {
    /// A streaming response from an OpenAI-compatible endpoint.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        stop_epoch: Arc<AtomicU64>,
        epoch: u64,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse, stop_epoch: Arc<AtomicU64>) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            pending_token: None,
            tool_calls: Default::default(),
            pending_tool_calls: Default::default(),
            pending_finish_reason: Default::default(),
            finished: false,
        };
        let epoch = stop_epoch.load(Ordering::Acquire);
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
            stop_epoch,
            epoch,
        }
    }
}

impl CompletionResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<CompletionEvent>, Self::Error>> {
        let this = self.project();
        if this.next_event_fut.is_some()
            && this.stop_epoch.load(Ordering::Acquire) != *this.epoch
        {
            // Dropping the future closes the connection.
            debug!("response interrupted");
            *this.next_event_fut = None;
            return Poll::Ready(Ok(Some(CompletionEvent::Completed(
                FinishReason::Interrupted,
            ))));
        }

        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };

        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        // The order of events are important. Text goes first, then pending
        // tool calls, then the finish reason, and nothing after it.
        if let Some(token) = partial_state.pending_token.take() {
            return Ok((Some(CompletionEvent::Token(token)), partial_state));
        }
        if let Some(tool_call) = partial_state.pending_tool_calls.pop_front() {
            return Ok((Some(CompletionEvent::ToolCall(tool_call)), partial_state));
        }
        if let Some(reason) = partial_state.pending_finish_reason.take() {
            return Ok((Some(CompletionEvent::Completed(reason)), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // The server hung up without a finish reason.
                partial_state.finish(None);
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            partial_state.finish(None);
            continue;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };

        // The usage chunk carries no choices.
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };

        for tool_call in choice.delta.tool_calls.into_iter().flatten() {
            partial_state.patch_tool_call(tool_call);
        }
        if let Some(finish_reason) = choice.finish_reason.as_deref() {
            partial_state.finish(Some(finish_reason));
        }
        let content = choice.delta.content.filter(|c| !c.is_empty());
        if let Some(reasoning) =
            choice.delta.reasoning_content.filter(|r| !r.is_empty())
        {
            partial_state.pending_token = content;
            return Ok((Some(CompletionEvent::Reasoning(reasoning)), partial_state));
        }
        if let Some(content) = content {
            return Ok((Some(CompletionEvent::Token(content)), partial_state));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;

    use super::*;
    use crate::io::Chunks;

    fn response_from(bytes: &'static [u8]) -> OpenAIResponse {
        let chunks = Chunks::from_vec_deque(vec![Bytes::from_static(bytes)].into());
        OpenAIResponse::from_sse(Sse::new(chunks), Default::default())
    }

    async fn collect(resp: OpenAIResponse) -> Vec<CompletionEvent> {
        let mut resp = pin!(resp);
        let mut events = vec![];
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_tool_call_events() {
        let events = collect(response_from(include_bytes!(
            "../fixtures/test_response.txt"
        )))
        .await;
        assert_eq!(
            events,
            vec![
                CompletionEvent::Token("Let me check.".to_owned()),
                CompletionEvent::ToolCall(ToolCall::function(
                    "call_weather",
                    "get_weather",
                    "{\"location\":\"Paris\"}",
                )),
                CompletionEvent::ToolCall(ToolCall::function(
                    "call_time",
                    "get_time",
                    "{}",
                )),
                CompletionEvent::Completed(FinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_events() {
        let events = collect(response_from(
            b"data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n\
              data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"content\":\" there\"},\"finish_reason\":\"stop\"}]}\n\n\
              data: [DONE]\n\n",
        ))
        .await;
        assert_eq!(
            events,
            vec![
                CompletionEvent::Token("Hi".to_owned()),
                CompletionEvent::Token(" there".to_owned()),
                CompletionEvent::Completed(FinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_reasoning_events() {
        let events = collect(response_from(
            b"data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"reasoning_content\":\"Easy.\"},\"finish_reason\":null}]}\n\n\
              data: {\"id\":\"a\",\"choices\":[{\"delta\":{\"reasoning_content\":\" Done.\",\"content\":\"4\"},\"finish_reason\":\"stop\"}]}\n\n\
              data: [DONE]\n\n",
        ))
        .await;
        assert_eq!(
            events,
            vec![
                CompletionEvent::Reasoning("Easy.".to_owned()),
                CompletionEvent::Reasoning(" Done.".to_owned()),
                CompletionEvent::Token("4".to_owned()),
                CompletionEvent::Completed(FinishReason::Stop),
            ]
        );
    }

    #[tokio::test]
    async fn test_id_mismatch() {
        let resp = response_from(
            b"data: {\"id\":\"a\",\"choices\":[{\"delta\":{},\"finish_reason\":null}]}\n\n\
              data: {\"id\":\"b\",\"choices\":[{\"delta\":{},\"finish_reason\":null}]}\n\n",
        );
        let mut resp = pin!(resp);
        let err = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "chunk id mismatch");
    }

    #[tokio::test]
    async fn test_interrupted() {
        let stop_epoch = Arc::new(AtomicU64::new(0));
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(include_bytes!(
                "../fixtures/test_response.txt"
            ))]
            .into(),
        );
        let mut resp =
            pin!(OpenAIResponse::from_sse(Sse::new(chunks), stop_epoch.clone()));
        let first = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(
            first.unwrap(),
            Some(CompletionEvent::Token("Let me check.".to_owned()))
        );

        stop_epoch.fetch_add(1, Ordering::AcqRel);
        let next = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(
            next.unwrap(),
            Some(CompletionEvent::Completed(FinishReason::Interrupted))
        );
        let end = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(end.unwrap(), None);
    }
}
