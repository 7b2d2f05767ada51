use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use toolchat_model::{CompletionEngine, CompletionOptions};

use super::{Chat, Driver, OnErrorFn, OnIdleFn};
use crate::config::ChatConfig;
use crate::controller::{TurnController, TurnError};
use crate::coordinator::{ConfirmFn, Coordinator};
use crate::message::DisplayMessage;
use crate::orchestrator::Orchestrator;
use crate::state::StateCell;
use crate::store::ConversationStore;
use crate::tool::{Tool, ToolApproval, ToolRegistry, ToolRegistryBuilder};

/// [`Chat`] builder.
pub struct ChatBuilder {
    orchestrator: Orchestrator,
    tools: ToolRegistryBuilder,
    registry: Option<ToolRegistry>,
    config: ChatConfig,
    on_confirm: Option<ConfirmFn>,
    on_idle: Option<OnIdleFn>,
    on_error: Option<OnErrorFn>,
}

impl ChatBuilder {
    /// Creates a new builder with the specified completion engine.
    #[inline]
    pub fn with_engine<E: CompletionEngine + 'static>(engine: E) -> Self {
        Self {
            orchestrator: Orchestrator::new(engine),
            tools: ToolRegistryBuilder::default(),
            registry: None,
            config: ChatConfig::default(),
            on_confirm: None,
            on_idle: None,
            on_error: None,
        }
    }

    /// Replaces the whole configuration.
    #[inline]
    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the initial system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Sets the welcome message, `None` to start with an empty conversation.
    #[inline]
    pub fn with_welcome_message<S: Into<String>>(
        mut self,
        message: Option<S>,
    ) -> Self {
        self.config.welcome_message = message.map(Into::into);
        self
    }

    #[inline]
    pub fn with_max_tool_rounds(mut self, rounds: Option<usize>) -> Self {
        self.config.max_tool_rounds = rounds;
        self
    }

    #[inline]
    pub fn with_continuation_delay(mut self, delay: Duration) -> Self {
        self.config.continuation_delay = delay;
        self
    }

    #[inline]
    pub fn with_retry_budget(mut self, budget: Option<Duration>) -> Self {
        self.config.retry_budget = budget;
        self
    }

    #[inline]
    pub fn with_completion_options(mut self, options: CompletionOptions) -> Self {
        self.config.completion_options = options;
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools = self.tools.with_tool(tool);
        self
    }

    /// Uses a prebuilt registry instead of the tools registered with
    /// [`ChatBuilder::with_tool`].
    #[inline]
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attaches a callback to be invoked for every tool call before it runs.
    /// Without one, all tool calls are approved.
    #[inline]
    pub fn on_confirm(
        mut self,
        on_confirm: impl Fn(ToolApproval) + Send + Sync + 'static,
    ) -> Self {
        self.on_confirm = Some(Arc::new(on_confirm));
        self
    }

    /// Attaches a callback to be invoked when the chat becomes idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Attaches a callback to be invoked when a turn fails.
    #[inline]
    pub fn on_error(
        mut self,
        on_error: impl Fn(&TurnError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Builds the chat and spawns its driver task.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> Chat {
        let ChatBuilder {
            orchestrator,
            tools,
            registry,
            config,
            on_confirm,
            on_idle,
            on_error,
        } = self;

        let orchestrator = orchestrator
            .with_options(config.completion_options)
            .with_retry_budget(config.retry_budget);
        let registry = registry.unwrap_or_else(|| tools.build());
        let store = ConversationStore::new();
        store.reset(config.welcome_message.as_deref().map(DisplayMessage::notice));
        let state = StateCell::new();
        let (system_prompt, _) = watch::channel(config.system_prompt);
        let system_prompt = Arc::new(system_prompt);

        let controller = TurnController {
            orchestrator: orchestrator.clone(),
            coordinator: Coordinator::new(
                registry.clone(),
                store.clone(),
                state.clone(),
                on_confirm,
            ),
            registry: registry.clone(),
            store: store.clone(),
            state: state.clone(),
            system_prompt: Arc::clone(&system_prompt),
            max_tool_rounds: config.max_tool_rounds,
            continuation_delay: config.continuation_delay,
        };
        let driver = Driver {
            controller,
            welcome_message: config.welcome_message,
            on_idle,
            on_error,
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(driver.run(cmd_rx));

        Chat {
            cmd_tx,
            store,
            state,
            system_prompt,
            orchestrator,
            registry,
            stop_token: Mutex::new(CancellationToken::new()),
        }
    }
}
