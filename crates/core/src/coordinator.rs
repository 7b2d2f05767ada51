use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::select;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use toolchat_model::{ToolCall, WireMessage};
use tracing::Instrument;

use crate::message::{Author, DisplayMessage, new_id};
use crate::state::{StateCell, TurnState};
use crate::store::ConversationStore;
use crate::tool::{Error as ToolError, ToolApproval, ToolRegistry, ToolResult};

pub(crate) type ConfirmFn = Arc<dyn Fn(ToolApproval) + Send + Sync>;

/// The outcome of one tool call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolExecutionResult {
    pub id: String,
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionResult {
    fn new(id: String, result: ToolResult) -> Self {
        match result {
            Ok(value) => Self {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                id,
                result: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Returns the content of the `tool` message for this result: the
    /// error, or the JSON encoding of the result value.
    pub fn content(&self) -> String {
        match (&self.error, &self.result) {
            (Some(error), _) => error.clone(),
            (None, Some(value)) => value.to_string(),
            (None, None) => Value::Null.to_string(),
        }
    }
}

/// Assigns ids to calls without one and removes duplicated ids, keeping the
/// last occurrence of each id at its position.
pub fn prepare_tool_calls(mut calls: Vec<ToolCall>) -> Vec<ToolCall> {
    for call in &mut calls {
        if call.id.is_empty() {
            call.id = new_id();
        }
    }

    let last_index: HashMap<String, usize> = calls
        .iter()
        .enumerate()
        .map(|(idx, call)| (call.id.clone(), idx))
        .collect();
    calls
        .into_iter()
        .enumerate()
        .filter(|(idx, call)| last_index.get(&call.id) == Some(idx))
        .map(|(_, call)| call)
        .collect()
}

/// Confirms and executes tool calls one by one, appending each result to the
/// store.
pub(crate) struct Coordinator {
    registry: ToolRegistry,
    store: ConversationStore,
    state: StateCell,
    on_confirm: Option<ConfirmFn>,
}

impl Coordinator {
    pub fn new(
        registry: ToolRegistry,
        store: ConversationStore,
        state: StateCell,
        on_confirm: Option<ConfirmFn>,
    ) -> Self {
        Self {
            registry,
            store,
            state,
            on_confirm,
        }
    }

    /// Executes `calls` strictly in order. Every call gets a result, calls
    /// left after `cancel` fires are recorded as declined.
    pub async fn execute(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolExecutionResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self
                .execute_one(call, cancel)
                .instrument(debug_span!("tool call", id = %call.id))
                .await;

            let tool_message = WireMessage::tool(&call.id, result.content());
            self.store.append(
                DisplayMessage::text(
                    Author::Assistant,
                    format!("Tool Result:\n{}", result.content()),
                )
                .with_metadata(|metadata| {
                    metadata.tool_message = Some(tool_message);
                }),
            );
            results.push(result);
        }
        results
    }

    async fn execute_one(
        &self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> ToolExecutionResult {
        self.state.set(TurnState::AwaitingConfirmation);
        if !self.confirm(call, cancel).await {
            debug!("declined: {}", call.function.name);
            return ToolExecutionResult::new(
                call.id.clone(),
                Err(ToolError::declined()),
            );
        }

        self.state.set(TurnState::ExecutingTool);
        let fut = self
            .registry
            .invoke(&call.function.name, &call.function.arguments);
        let result = fut.await;
        if let Err(err) = &result {
            warn!("tool `{}` failed: {err}", call.function.name);
        }
        ToolExecutionResult::new(call.id.clone(), result)
    }

    async fn confirm(&self, call: &ToolCall, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let Some(on_confirm) = &self.on_confirm else {
            // No confirmation handler provided, assuming yolo mode.
            return true;
        };

        let (approval_tx, approval_rx) = oneshot::channel();
        let mut approval = ToolApproval::new(
            &call.id,
            &call.function.name,
            &call.function.arguments,
        );
        approval.on_result = Some(Box::new(move |approved| {
            approval_tx.send(approved).ok();
        }));
        on_confirm(approval);

        select! {
            biased;

            _ = cancel.cancelled() => false,
            // A dropped approval is a decline.
            approved = approval_rx => approved.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;
    use std::sync::Mutex;

    use schemars::JsonSchema;
    use serde::Deserialize;

    use super::*;
    use crate::tool::{Tool, schema_for};

    #[derive(Deserialize, JsonSchema)]
    struct AddParameters {
        a: i64,
        b: i64,
    }

    struct AddTool {
        parameter_schema: Value,
        calls: Arc<Mutex<Vec<(i64, i64)>>>,
    }

    impl Tool for AddTool {
        type Input = AddParameters;
        type Output = i64;

        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> &str {
            "Adds two integers"
        }

        fn parameter_schema(&self) -> &Value {
            &self.parameter_schema
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = Result<i64, ToolError>> + Send + 'static
        {
            self.calls.lock().unwrap().push((input.a, input.b));
            ready(Ok(input.a + input.b))
        }
    }

    struct Fixture {
        coordinator: Coordinator,
        store: ConversationStore,
        calls: Arc<Mutex<Vec<(i64, i64)>>>,
    }

    fn fixture(on_confirm: Option<ConfirmFn>) -> Fixture {
        let calls = Arc::new(Mutex::new(vec![]));
        let registry = ToolRegistry::builder()
            .with_tool(AddTool {
                parameter_schema: schema_for::<AddParameters>(),
                calls: Arc::clone(&calls),
            })
            .build();
        let store = ConversationStore::new();
        let coordinator = Coordinator::new(
            registry,
            store.clone(),
            StateCell::new(),
            on_confirm,
        );
        Fixture {
            coordinator,
            store,
            calls,
        }
    }

    fn add_call(id: &str, a: i64, b: i64) -> ToolCall {
        ToolCall::function(id, "add", format!(r#"{{"a":{a},"b":{b}}}"#))
    }

    fn tool_messages(store: &ConversationStore) -> Vec<WireMessage> {
        store
            .snapshot()
            .messages()
            .iter()
            .rev()
            .filter_map(|msg| msg.metadata.tool_message.clone())
            .collect()
    }

    #[test]
    fn test_prepare_tool_calls() {
        let calls = prepare_tool_calls(vec![
            add_call("a", 1, 1),
            add_call("b", 2, 2),
            add_call("a", 3, 3),
        ]);
        let ids: Vec<_> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(calls[1].function.arguments, r#"{"a":3,"b":3}"#);

        let calls = prepare_tool_calls(vec![add_call("", 1, 1), add_call("", 2, 2)]);
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].id.is_empty());
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[tokio::test]
    async fn test_dedup_and_order() {
        let Fixture {
            coordinator,
            store,
            calls,
        } = fixture(None);

        let tool_calls = prepare_tool_calls(vec![
            add_call("a", 1, 1),
            add_call("b", 2, 2),
            add_call("a", 3, 3),
        ]);
        let results = coordinator
            .execute(&tool_calls, &CancellationToken::new())
            .await;

        assert_eq!(*calls.lock().unwrap(), [(2, 2), (3, 3)]);
        assert_eq!(results.len(), 2);
        assert_eq!(
            tool_messages(&store),
            [WireMessage::tool("b", "4"), WireMessage::tool("a", "6")]
        );
        let snapshot = store.snapshot();
        let newest = &snapshot.messages()[0];
        assert_eq!(newest.text_or_empty(), "Tool Result:\n6");
    }

    #[tokio::test]
    async fn test_decline() {
        let asked = Arc::new(Mutex::new(vec![]));
        let on_confirm: ConfirmFn = {
            let asked = Arc::clone(&asked);
            Arc::new(move |approval: ToolApproval| {
                asked.lock().unwrap().push(approval.to_string());
                approval.decline();
            })
        };
        let Fixture {
            coordinator,
            store,
            calls,
        } = fixture(Some(on_confirm));

        let results = coordinator
            .execute(&[add_call("t1", 2, 2)], &CancellationToken::new())
            .await;

        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(*asked.lock().unwrap(), [r#"add({"a":2,"b":2})"#]);
        assert_eq!(results[0].error.as_deref(), Some("declined by user"));
        assert_eq!(
            tool_messages(&store),
            [WireMessage::tool("t1", "declined by user")]
        );
    }

    #[tokio::test]
    async fn test_dropped_approval_is_decline() {
        let Fixture { coordinator, calls, .. } =
            fixture(Some(Arc::new(|approval: ToolApproval| drop(approval))));
        let results = coordinator
            .execute(&[add_call("t1", 2, 2)], &CancellationToken::new())
            .await;
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(results[0].content(), "declined by user");
    }

    #[tokio::test]
    async fn test_errors_are_per_call() {
        let Fixture {
            coordinator,
            store,
            calls,
        } = fixture(None);

        let tool_calls = vec![
            ToolCall::function("bad", "add", "{not json"),
            ToolCall::function("unknown", "multiply", "{}"),
            add_call("good", 1, 2),
        ];
        let results = coordinator
            .execute(&tool_calls, &CancellationToken::new())
            .await;

        assert!(results[0].error.as_ref().unwrap().starts_with("Invalid arguments"));
        assert_eq!(results[1].error.as_deref(), Some("Tool not found: multiply"));
        assert_eq!(results[2].result, Some(Value::from(3)));
        assert_eq!(*calls.lock().unwrap(), [(1, 2)]);
        assert_eq!(tool_messages(&store).len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_calls_are_declined() {
        let confirmed = Arc::new(Mutex::new(0));
        let on_confirm: ConfirmFn = {
            let confirmed = Arc::clone(&confirmed);
            Arc::new(move |approval: ToolApproval| {
                *confirmed.lock().unwrap() += 1;
                approval.approve();
            })
        };
        let Fixture { coordinator, calls, .. } = fixture(Some(on_confirm));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = coordinator
            .execute(&[add_call("a", 1, 1), add_call("b", 2, 2)], &cancel)
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(*confirmed.lock().unwrap(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }
}
