use std::future::ready;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use toolchat_model::{Role, ToolCall, WireMessage};
use toolchat_test_engine::{PresetEvent, PresetResponse, TestEngine};

use super::*;
use crate::coordinator::ConfirmFn;
use crate::tool::{Error as ToolError, Tool, ToolApproval, schema_for};

#[derive(Deserialize, JsonSchema)]
struct CalculateParameters {
    expression: String,
}

struct FakeCalculator {
    parameter_schema: Value,
    invocations: Arc<AtomicUsize>,
}

impl Tool for FakeCalculator {
    type Input = CalculateParameters;
    type Output = i64;

    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<i64, ToolError>> + Send + 'static {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        ready(match input.expression.as_str() {
            "2+2" => Ok(4),
            _ => Err(ToolError::execution_error().with_reason("unsupported")),
        })
    }
}

struct Harness {
    controller: TurnController,
    engine: TestEngine,
    store: ConversationStore,
    invocations: Arc<AtomicUsize>,
}

fn harness(engine: TestEngine, on_confirm: Option<ConfirmFn>) -> Harness {
    let invocations = Arc::new(AtomicUsize::new(0));
    let registry = ToolRegistry::builder()
        .with_tool(FakeCalculator {
            parameter_schema: schema_for::<CalculateParameters>(),
            invocations: Arc::clone(&invocations),
        })
        .build();
    let store = ConversationStore::new();
    let state = StateCell::new();
    let (system_prompt, _) = watch::channel("S".to_owned());
    let controller = TurnController {
        orchestrator: Orchestrator::new(engine.clone()),
        coordinator: Coordinator::new(
            registry.clone(),
            store.clone(),
            state.clone(),
            on_confirm,
        ),
        registry,
        store: store.clone(),
        state,
        system_prompt: Arc::new(system_prompt),
        max_tool_rounds: Some(10),
        continuation_delay: Duration::ZERO,
    };
    Harness {
        controller,
        engine,
        store,
        invocations,
    }
}

fn calculate_call(id: &str) -> PresetEvent {
    PresetEvent::ToolCall(ToolCall::function(
        id,
        "calculate",
        r#"{"expression":"2+2"}"#,
    ))
}

fn texts(store: &ConversationStore) -> Vec<String> {
    store
        .snapshot()
        .messages()
        .iter()
        .rev()
        .map(|msg| msg.text_or_empty().to_owned())
        .collect()
}

#[tokio::test]
async fn test_plain_answer() {
    let mut engine = TestEngine::default();
    engine.add_assistant_step(PresetResponse::with_text("4"));
    let Harness {
        controller,
        engine,
        store,
        ..
    } = harness(engine, None);

    let outcome = controller
        .run_turn(Some("2+2".to_owned()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(texts(&store), ["2+2", "4"]);
    // No second request without tool calls.
    assert_eq!(engine.requests().len(), 1);
    assert_eq!(controller.state.get(), TurnState::Idle);
}

#[tokio::test]
async fn test_tool_round_trip() {
    let mut engine = TestEngine::default();
    engine.add_assistant_step(
        PresetResponse::with_events([calculate_call("t1")]).with_content(""),
    );
    engine.add_assistant_step(PresetResponse::with_text("It is 4."));

    let states = Arc::new(Mutex::new(vec![]));
    let Harness {
        controller,
        engine,
        store,
        invocations,
    } = harness(engine, None);
    let on_confirm: ConfirmFn = {
        let states = Arc::clone(&states);
        let state = controller.state.clone();
        Arc::new(move |approval: ToolApproval| {
            states.lock().unwrap().push(state.get());
            approval.approve();
        })
    };
    let controller = TurnController {
        coordinator: Coordinator::new(
            controller.registry.clone(),
            store.clone(),
            controller.state.clone(),
            Some(on_confirm),
        ),
        ..controller
    };

    let outcome = controller
        .run_turn(Some("2+2".to_owned()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(*states.lock().unwrap(), [TurnState::AwaitingConfirmation]);
    assert_eq!(
        texts(&store),
        [
            "2+2",
            r#"Call: calculate({"expression":"2+2"})"#,
            "Tool Result:\n4",
            "It is 4."
        ]
    );

    let requests = engine.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1].messages;
    assert_eq!(second.len(), 4);
    assert_eq!(second[0], WireMessage::system("S"));
    assert_eq!(second[2].role(), Role::Assistant);
    assert_eq!(second[2].tool_calls()[0].id, "t1");
    assert_eq!(second[3], WireMessage::tool("t1", "4"));
}

#[tokio::test]
async fn test_declined_tool_call() {
    let mut engine = TestEngine::default();
    engine.add_assistant_step(
        PresetResponse::with_events([
            PresetEvent::Token("Let me check.".to_owned()),
            calculate_call("t1"),
        ]),
    );
    engine.add_assistant_step(PresetResponse::with_text("Okay."));
    let Harness {
        controller,
        engine,
        store,
        invocations,
    } = harness(
        engine,
        Some(Arc::new(|approval: ToolApproval| approval.decline())),
    );

    controller
        .run_turn(Some("2+2".to_owned()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    // The text is kept when the model said something besides the call.
    assert_eq!(texts(&store)[1], "Let me check.");
    let second = &engine.requests()[1].messages;
    assert_eq!(second[3], WireMessage::tool("t1", "declined by user"));
}

#[tokio::test]
async fn test_engine_failure() {
    let Harness {
        controller, store, ..
    } = harness(TestEngine::default(), None);

    let err = controller
        .run_turn(Some("hi".to_owned()), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::Engine(_)));
    assert_eq!(controller.state.get(), TurnState::Idle);
    // The user message and the empty placeholder are kept, the placeholder
    // is not sent again.
    assert_eq!(texts(&store), ["hi", ""]);
    let wire = codec::to_wire(store.snapshot().messages(), "S");
    assert_eq!(wire, [WireMessage::system("S"), WireMessage::user("hi")]);
}

#[tokio::test]
async fn test_round_limit() {
    let mut engine = TestEngine::default();
    for idx in 0..3 {
        engine.add_assistant_step(PresetResponse::with_events([
            calculate_call(&format!("t{idx}")),
        ]));
    }
    let Harness {
        mut controller,
        engine,
        store,
        invocations,
    } = harness(engine, None);
    controller.max_tool_rounds = Some(2);

    let outcome = controller
        .run_turn(Some("loop".to_owned()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::RoundLimitReached);
    assert_eq!(engine.requests().len(), 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    let snapshot = store.snapshot();
    let newest = &snapshot.messages()[0];
    assert!(newest.metadata.system);
    assert_eq!(
        newest.text_or_empty(),
        "Stopped after 2 rounds of tool calls."
    );
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_turn() {
    let mut engine = TestEngine::default();
    engine.set_delay(Duration::from_millis(10));
    let mut events = PresetResponse::with_text("a b c d e f g h").events;
    events.push(calculate_call("t1"));
    engine.add_assistant_step(PresetResponse::with_events(events));
    let Harness {
        controller,
        engine,
        store,
        invocations,
    } = harness(engine, None);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            cancel.cancel();
        }
    });
    let outcome = controller
        .run_turn(Some("go".to_owned()), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Interrupted);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(engine.requests().len(), 1);
    assert_eq!(texts(&store), ["go", "a b c "]);
}

#[tokio::test]
async fn test_live_system_prompt() {
    let mut engine = TestEngine::default();
    engine.add_assistant_step(PresetResponse::with_text("one"));
    engine.add_assistant_step(PresetResponse::with_text("two"));
    let Harness {
        controller, engine, ..
    } = harness(engine, None);

    let cancel = CancellationToken::new();
    controller
        .run_turn(Some("first".to_owned()), &cancel)
        .await
        .unwrap();
    controller.system_prompt.send_replace("S2".to_owned());
    controller
        .run_turn(Some("second".to_owned()), &cancel)
        .await
        .unwrap();

    let requests = engine.requests();
    assert_eq!(requests[0].messages[0], WireMessage::system("S"));
    assert_eq!(requests[1].messages[0], WireMessage::system("S2"));
    assert_eq!(
        requests[1]
            .messages
            .iter()
            .filter(|msg| msg.role() == Role::System)
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_streamed_text_is_trimmed() {
    let mut engine = TestEngine::default();
    engine.add_assistant_step(
        PresetResponse::with_events([
            PresetEvent::Token("  Hi".to_owned()),
            PresetEvent::Token(" there".to_owned()),
        ])
        .with_content("Hi there"),
    );
    let Harness {
        controller, store, ..
    } = harness(engine, None);

    let seen = Arc::new(Mutex::new(vec![]));
    let mut messages_rx = store.subscribe();
    tokio::spawn({
        let seen = Arc::clone(&seen);
        async move {
            while messages_rx.changed().await.is_ok() {
                let snapshot = messages_rx.borrow_and_update().clone();
                let newest = &snapshot.messages()[0];
                if newest.author == Author::Assistant {
                    seen.lock()
                        .unwrap()
                        .push((snapshot.version(), newest.text_or_empty().to_owned()));
                }
            }
        }
    });

    controller
        .run_turn(Some("hello".to_owned()), &CancellationToken::new())
        .await
        .unwrap();
    tokio::task::yield_now().await;

    // One mutation for the placeholder, one per token, one to settle.
    assert_eq!(
        *seen.lock().unwrap(),
        [
            (2, "".to_owned()),
            (3, "Hi".to_owned()),
            (4, "Hi there".to_owned()),
            (5, "Hi there".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_reasoning_is_sent_back() {
    let mut engine = TestEngine::default();
    engine.add_assistant_step(PresetResponse::with_events([
        PresetEvent::Reasoning("Two plus two.".to_owned()),
        PresetEvent::Token("4".to_owned()),
    ]));
    engine.add_assistant_step(PresetResponse::with_text("Sure."));
    let Harness {
        controller,
        engine,
        store,
        ..
    } = harness(engine, None);

    let cancel = CancellationToken::new();
    controller
        .run_turn(Some("2+2".to_owned()), &cancel)
        .await
        .unwrap();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.messages()[0].text_or_empty(), "4");
    assert_eq!(
        snapshot.messages()[0].metadata.reasoning.as_deref(),
        Some("Two plus two.")
    );

    controller
        .run_turn(Some("Thanks".to_owned()), &cancel)
        .await
        .unwrap();
    let second = &engine.requests()[1].messages;
    assert_eq!(second[2].reasoning_content(), Some("Two plus two."));
    assert_eq!(texts(&store), ["2+2", "4", "Thanks", "Sure."]);
}

#[tokio::test]
async fn test_disabled_tools_are_not_offered() {
    let mut engine = TestEngine::default();
    engine.add_assistant_step(PresetResponse::with_text("No tools."));
    let Harness {
        controller, engine, ..
    } = harness(engine, None);

    assert!(controller.registry.set_enabled("calculate", false));
    controller
        .run_turn(Some("2+2".to_owned()), &CancellationToken::new())
        .await
        .unwrap();

    let options = &engine.requests()[0].options;
    assert!(options.tools.is_empty());
    assert_eq!(options.tool_choice, None);
}
