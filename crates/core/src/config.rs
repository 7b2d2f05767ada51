use std::time::Duration;

use toolchat_model::CompletionOptions;

/// The system prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with \
    access to tools. You can call tools to help answer user questions.";

/// The notice shown at the top of a fresh conversation.
pub const DEFAULT_WELCOME_MESSAGE: &str = "Hello! I'm a tool-calling AI \
    assistant. I will ask before running any tool. Try asking me something!";

/// Behavior of a [`Chat`](crate::Chat).
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// The initial system prompt. It can be changed while chatting.
    pub system_prompt: String,
    /// Seeded as a system notice on start, reset and import.
    pub welcome_message: Option<String>,
    /// How many rounds of tool calls a single turn may run. `None` means
    /// unbounded.
    pub max_tool_rounds: Option<usize>,
    /// Pause between appending tool results and the continuation request.
    /// Zero only yields to other tasks.
    pub continuation_delay: Duration,
    /// Retry rate-limited requests until this much time has passed.
    pub retry_budget: Option<Duration>,
    /// Base options for every completion request.
    pub completion_options: CompletionOptions,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            welcome_message: Some(DEFAULT_WELCOME_MESSAGE.to_owned()),
            max_tool_rounds: Some(10),
            continuation_delay: Duration::ZERO,
            retry_budget: Some(Duration::from_secs(30)),
            completion_options: CompletionOptions::default(),
        }
    }
}
