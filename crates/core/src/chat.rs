mod builder;

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use toolchat_model::FormattedChat;
use tracing::Instrument;

pub use builder::ChatBuilder;

use crate::codec::{self, ImportError, Redaction};
use crate::controller::{TurnController, TurnError};
use crate::message::DisplayMessage;
use crate::orchestrator::{EngineFailure, Orchestrator};
use crate::state::{StateCell, TurnState};
use crate::store::{ConversationStore, Snapshot};
use crate::tool::ToolRegistry;

type OnIdleFn = Box<dyn Fn() + Send + Sync>;
type OnErrorFn = Box<dyn Fn(&TurnError) + Send + Sync>;

enum Command {
    Send {
        text: String,
        cancel: CancellationToken,
    },
    Import {
        json: String,
        reply: oneshot::Sender<Result<(), ImportError>>,
    },
    Reset,
    Shutdown,
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Send { text, .. } => {
                f.debug_tuple("Send").field(text).finish_non_exhaustive()
            }
            Command::Import { json, .. } => f
                .debug_struct("Import")
                .field("len", &json.len())
                .finish_non_exhaustive(),
            Command::Reset => f.write_str("Reset"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A handle to a running chat.
///
/// Messages, imports and resets are queued and applied one at a time by a
/// single driver task, so a message sent while a turn is running waits for
/// that turn to settle. Stopping, reading and editing the system prompt, and
/// enabling tools take effect immediately.
///
/// Dropping the handle lets the driver finish the queued commands and exit.
pub struct Chat {
    cmd_tx: mpsc::UnboundedSender<Command>,
    store: ConversationStore,
    state: StateCell,
    system_prompt: Arc<watch::Sender<String>>,
    orchestrator: Orchestrator,
    registry: ToolRegistry,
    // Parent of the tokens handed to queued messages, replaced on stop.
    stop_token: Mutex<CancellationToken>,
}

impl Chat {
    /// Enqueues a user message.
    pub fn send<S: Into<String>>(&self, text: S) -> Result<(), TurnError> {
        let cancel = lock(&self.stop_token).child_token();
        self.cmd_tx
            .send(Command::Send {
                text: text.into(),
                cancel,
            })
            .map_err(|_| TurnError::Closed)
    }

    /// Replaces the conversation with a JSON array of wire messages, once
    /// the queued commands before it are done.
    ///
    /// Nothing changes if the payload is rejected. The first system message,
    /// if any, becomes the new system prompt.
    pub async fn import(&self, json: &str) -> Result<(), ImportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Import {
                json: json.to_owned(),
                reply: reply_tx,
            })
            .map_err(|_| ImportError::Closed)?;
        reply_rx.await.unwrap_or(Err(ImportError::Closed))
    }

    /// Clears the conversation, leaving only the welcome message.
    pub fn reset(&self) -> Result<(), TurnError> {
        self.cmd_tx.send(Command::Reset).map_err(|_| TurnError::Closed)
    }

    /// Asks the driver to exit after the queued commands before it.
    pub fn shutdown(&self) {
        self.cmd_tx.send(Command::Shutdown).ok();
    }

    /// Stops the running turn, and the messages queued behind it. The partial
    /// answer is kept and no tool is executed afterwards.
    ///
    /// Messages sent after this call are not affected.
    pub fn stop(&self) {
        debug!("stop requested");
        let mut stop_token = lock(&self.stop_token);
        stop_token.cancel();
        *stop_token = CancellationToken::new();
    }

    #[inline]
    pub fn system_prompt(&self) -> String {
        self.system_prompt.borrow().clone()
    }

    /// Changes the system prompt. The next request uses it.
    #[inline]
    pub fn set_system_prompt<S: Into<String>>(&self, prompt: S) {
        self.system_prompt.send_replace(prompt.into());
    }

    /// Exports the conversation as a JSON array of wire messages.
    pub fn export(
        &self,
        redaction: Redaction,
    ) -> Result<String, serde_json::Error> {
        codec::export(
            self.store.snapshot().messages(),
            &self.system_prompt(),
            redaction,
        )
    }

    /// Renders the prompt the engine would see for the current
    /// conversation.
    pub async fn format_chat(&self) -> Result<FormattedChat, EngineFailure> {
        let wire =
            codec::to_wire(self.store.snapshot().messages(), &self.system_prompt());
        self.orchestrator.format_chat(wire).await
    }

    #[inline]
    pub fn messages(&self) -> Snapshot {
        self.store.snapshot()
    }

    #[inline]
    pub fn subscribe_messages(&self) -> watch::Receiver<Snapshot> {
        self.store.subscribe()
    }

    /// Returns the registered tools, for enabling or disabling them.
    #[inline]
    pub fn tools(&self) -> &ToolRegistry {
        &self.registry
    }

    #[inline]
    pub fn state(&self) -> TurnState {
        self.state.get()
    }

    #[inline]
    pub fn subscribe_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }
}

/// Owns the controller and applies commands one at a time.
struct Driver {
    controller: TurnController,
    welcome_message: Option<String>,
    on_idle: Option<OnIdleFn>,
    on_error: Option<OnErrorFn>,
}

impl Driver {
    async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        debug!("started");
        while let Some(cmd) = cmd_rx.recv().await {
            trace!("received command: {cmd:?}");
            if matches!(cmd, Command::Shutdown) {
                break;
            }
            self.handle(cmd).instrument(trace_span!("proc cmd")).await;

            // Idle only once the queue has drained.
            if cmd_rx.is_empty() {
                if let Some(on_idle) = &self.on_idle {
                    on_idle();
                }
            }
        }
        debug!("will terminate");
    }

    async fn handle(&self, cmd: Command) {
        match cmd {
            Command::Send { text, cancel } => {
                match self.controller.run_turn(Some(text), &cancel).await {
                    Ok(outcome) => debug!("turn finished: {outcome:?}"),
                    Err(err) => {
                        if let Some(on_error) = &self.on_error {
                            on_error(&err);
                        }
                    }
                }
            }
            Command::Import { json, reply } => {
                let result = self.import(&json).await;
                if let Err(err) = &result {
                    warn!("import rejected: {err}");
                }
                reply.send(result).ok();
            }
            Command::Reset => {
                self.controller.store.reset(self.welcome());
            }
            Command::Shutdown => {}
        }
    }

    async fn import(&self, json: &str) -> Result<(), ImportError> {
        let imported = codec::parse_import(json)?;
        self.controller
            .orchestrator
            .format_chat(imported.wire.clone())
            .await
            .map_err(|err| ImportError::Rejected(err.to_string()))?;

        self.controller
            .store
            .replace(self.welcome(), imported.messages);
        if let Some(prompt) = imported.system_prompt {
            self.controller.system_prompt.send_replace(prompt);
        }
        Ok(())
    }

    fn welcome(&self) -> Option<DisplayMessage> {
        self.welcome_message.as_deref().map(DisplayMessage::notice)
    }
}
