#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::coordinator::{Coordinator, prepare_tool_calls};
use crate::message::{Author, DisplayMessage};
use crate::orchestrator::{EngineFailure, Orchestrator, StreamedToken};
use crate::state::{StateCell, TurnOutcome, TurnState};
use crate::store::ConversationStore;
use crate::tool::ToolRegistry;

/// Errors that abort a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("failed to generate response: {0}")]
    Engine(#[from] EngineFailure),
    #[error("chat has been shut down")]
    Closed,
}

/// Sequences completions and tool executions until the model stops asking
/// for tools.
pub(crate) struct TurnController {
    pub orchestrator: Orchestrator,
    pub coordinator: Coordinator,
    pub registry: ToolRegistry,
    pub store: ConversationStore,
    pub state: StateCell,
    pub system_prompt: Arc<watch::Sender<String>>,
    pub max_tool_rounds: Option<usize>,
    pub continuation_delay: Duration,
}

impl TurnController {
    /// Runs a full turn, optionally starting with a new user message.
    ///
    /// On error the store keeps everything appended so far and the state
    /// returns to idle.
    pub async fn run_turn(
        &self,
        input: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        if let Some(input) = input {
            self.store.append(DisplayMessage::text(Author::User, input));
        }

        let mut rounds = 0;
        loop {
            let result = self.run_round(cancel).await;
            let outcome = match result {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    rounds += 1;
                    if cancel.is_cancelled() {
                        TurnOutcome::Interrupted
                    } else if self.max_tool_rounds.is_some_and(|max| rounds >= max)
                    {
                        self.store.append(DisplayMessage::notice(format!(
                            "Stopped after {rounds} rounds of tool calls."
                        )));
                        TurnOutcome::RoundLimitReached
                    } else {
                        self.state.set(TurnState::Continuing);
                        self.flush().await;
                        continue;
                    }
                }
                Err(err) => {
                    error!("turn failed: {err}");
                    self.state.set(TurnState::Failed);
                    self.state.set(TurnState::Idle);
                    return Err(err);
                }
            };
            debug!("turn ended after {rounds} tool rounds: {outcome:?}");
            self.state.set(TurnState::Idle);
            return Ok(outcome);
        }
    }

    /// Runs one completion and its tool calls. Returns `None` if tools ran
    /// and the conversation should continue.
    async fn run_round(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutcome>, TurnError> {
        self.state.set(TurnState::Streaming);

        let wire = codec::to_wire(
            self.store.snapshot().messages(),
            &self.system_prompt.borrow(),
        );
        let placeholder = DisplayMessage::text(Author::Assistant, "");
        let response_id = placeholder.id.clone();
        self.store.append(placeholder);

        let on_token = {
            let store = self.store.clone();
            let response_id = response_id.clone();
            move |token: StreamedToken<'_>| {
                let text = token.accumulated.trim_start().to_owned();
                store.update(&response_id, move |msg| DisplayMessage {
                    text: Some(text),
                    ..msg.clone()
                });
            }
        };
        let result = self
            .orchestrator
            .run(wire, self.registry.definitions(), on_token, cancel)
            .await?;

        let content = result.display_text().to_owned();
        let reasoning = Some(result.reasoning).filter(|r| !r.is_empty());
        if result.interrupted || result.tool_calls.is_empty() {
            self.settle(&response_id, content, reasoning);
            if result.interrupted {
                return Ok(Some(TurnOutcome::Interrupted));
            }
            self.state.set(TurnState::Continuing);
            return Ok(Some(TurnOutcome::Completed));
        }

        let tool_calls = prepare_tool_calls(result.tool_calls);
        let text = if content.is_empty() {
            let calls = tool_calls
                .iter()
                .map(|call| {
                    format!("{}({})", call.function.name, call.function.arguments)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("Call: {calls}")
        } else {
            content
        };
        self.store.update(&response_id, |msg| {
            DisplayMessage {
                text: Some(text),
                ..msg.clone()
            }
            .with_metadata(|metadata| {
                metadata.tool_calls = Some(tool_calls.clone());
                metadata.reasoning = reasoning;
            })
        });

        self.coordinator.execute(&tool_calls, cancel).await;
        Ok(None)
    }

    fn settle(&self, id: &str, text: String, reasoning: Option<String>) {
        self.store.update(id, move |msg| {
            DisplayMessage {
                text: Some(text),
                ..msg.clone()
            }
            .with_metadata(|metadata| metadata.reasoning = reasoning)
        });
    }

    /// Lets observers catch up before the next request.
    async fn flush(&self) {
        if self.continuation_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.continuation_delay).await;
        }
    }
}
