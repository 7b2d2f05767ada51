//! Core logic including the turn loop, tool execution, the conversation
//! store and its wire translation.

#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod chat;
pub mod codec;
mod config;
mod controller;
mod coordinator;
pub mod message;
mod orchestrator;
mod state;
pub mod store;
pub mod tool;

pub use chat::{Chat, ChatBuilder};
pub use codec::{ImportError, Redaction};
pub use config::{ChatConfig, DEFAULT_SYSTEM_PROMPT, DEFAULT_WELCOME_MESSAGE};
pub use controller::TurnError;
pub use coordinator::{ToolExecutionResult, prepare_tool_calls};
pub use message::{Author, DisplayMessage, MessageKind, Metadata};
pub use orchestrator::{EngineFailure, Orchestrator, StreamedToken};
pub use state::{TurnOutcome, TurnState};
pub use store::{ConversationStore, Snapshot};
