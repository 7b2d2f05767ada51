use std::sync::Arc;

use tokio::sync::watch;

/// The stage the turn controller is in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TurnState {
    #[default]
    Idle,
    /// A completion is streaming.
    Streaming,
    /// Waiting for the user to confirm a tool call.
    AwaitingConfirmation,
    /// A confirmed tool is running.
    ExecutingTool,
    /// The completion settled, about to continue or go idle.
    Continuing,
    /// The turn was aborted by an engine error.
    Failed,
}

/// How a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Completed,
    /// The user stopped the turn.
    Interrupted,
    /// The model kept requesting tools until the round limit.
    RoundLimitReached,
}

/// Publishes the current [`TurnState`].
#[derive(Clone)]
pub(crate) struct StateCell(Arc<watch::Sender<TurnState>>);

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TurnState::Idle);
        Self(Arc::new(tx))
    }

    #[inline]
    pub fn set(&self, state: TurnState) {
        trace!("turn state: {state:?}");
        self.0.send_replace(state);
    }

    #[inline]
    pub fn get(&self) -> TurnState {
        *self.0.borrow()
    }

    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.0.subscribe()
    }
}
