//! # Connection State
//!
//! ```text
//!            start()
//!   INIT ──────────────► CONNECTING ──► REGISTERING ──► SERVING
//!                            ▲               │             │
//!                            │   failure     ▼   loss      ▼
//!                            └────────── DISCONNECTED ◄────┘
//!
//!   any non-terminal ── stop() / unrecoverable loss ──► DRAINING ──► STOPPED
//! ```
//!
//! One [`ConnectionStateCell`] exists per processor. Only the lifecycle
//! controller calls [`ConnectionStateCell::transition`]; the transport
//! channel's failure callback calls [`ConnectionStateCell::mark_lost`].

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Processor connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Init,
    Disconnected,
    Connecting,
    Registering,
    Serving,
    Draining,
    Stopped,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    /// Staying in the same state is always allowed.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Init, Connecting | Draining | Stopped)
                | (Disconnected, Connecting | Draining | Stopped)
                | (Connecting, Registering | Disconnected | Draining | Stopped)
                | (Registering, Serving | Disconnected | Draining | Stopped)
                | (Serving, Disconnected | Draining)
                | (Draining, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Stopped
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Registering => "REGISTERING",
            Self::Serving => "SERVING",
            Self::Draining => "DRAINING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal connection state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// The single authoritative connection state of a processor.
///
/// Cloning shares the cell. Observers subscribe to await changes.
#[derive(Debug, Clone)]
pub struct ConnectionStateCell {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Init);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        let mut result = Ok(next);
        self.tx.send_if_modified(|state| {
            let from = *state;
            if !from.can_transition_to(next) {
                result = Err(InvalidTransition { from, to: next });
                return false;
            }
            result = Ok(from);
            if from == next {
                return false;
            }
            *state = next;
            true
        });

        if let Ok(from) = result {
            if from != next {
                tracing::debug!(from = %from, to = %next, "Connection state changed");
            }
        }
        result
    }

    /// Failure callback for unexpected channel loss.
    ///
    /// Only a live connection (connecting, registering or serving) moves to
    /// DISCONNECTED. Returns whether the state changed.
    pub fn mark_lost(&self) -> bool {
        let changed = self.tx.send_if_modified(|state| {
            if matches!(
                *state,
                ConnectionState::Connecting
                    | ConnectionState::Registering
                    | ConnectionState::Serving
            ) {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::warn!("Connection to validator lost");
        }
        changed
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new()
    }
}
