//! Connection Close State
//!
//! The only state the two relay directions share. Every transition goes
//! through a single `watch` channel so a half-close or a teardown made by
//! one side is visible to the other before its next read or write.

use std::sync::Arc;
use tokio::sync::watch;

use crate::relay::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    Open,
    /// The given direction finished cleanly; the other is still draining
    HalfClosed(Direction),
    Closed,
}

impl CloseState {
    pub fn is_closed(&self) -> bool {
        matches!(self, CloseState::Closed)
    }
}

/// Shared handle to a connection's close state
#[derive(Clone, Debug)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<CloseState>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CloseState::Open);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> CloseState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CloseState> {
        self.tx.subscribe()
    }

    /// Record that `direction` ended cleanly. Both directions ended -> `Closed`.
    pub fn half_close(&self, direction: Direction) {
        self.tx.send_modify(|state| {
            *state = match *state {
                CloseState::Open => CloseState::HalfClosed(direction),
                CloseState::HalfClosed(other) if other != direction => CloseState::Closed,
                unchanged => unchanged,
            }
        });
    }

    /// Tear the whole connection down
    pub fn close(&self) {
        self.tx.send_if_modified(|state| {
            if state.is_closed() {
                false
            } else {
                *state = CloseState::Closed;
                true
            }
        });
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once the close state reaches `Closed`
pub async fn closed(rx: &mut watch::Receiver<CloseState>) {
    loop {
        if rx.borrow_and_update().is_closed() {
            return;
        }
        if rx.changed().await.is_err() {
            // All senders gone: nobody can close us any more
            std::future::pending::<()>().await;
        }
    }
}
