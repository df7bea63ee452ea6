//! Message bridge between the facade and the background connection worker.
//!
//! The two sides share no memory. The facade issues [`Command`]s, the worker answers with
//! [`Event`]s, and both travel over unbounded, ordered channels: commands arrive in the order
//! they were issued, every event reaches the single listener on the facade side, and neither
//! side ever waits on the other.
//!
//! Messages are serializable with an `action` tag, so the same protocol can be carried over
//! any transport that preserves order.

pub mod worker;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::config::ConnectionConfig;
use crate::machine::Phase;
use crate::types::{CloseCode, Payload};

pub use worker::Worker;

/// Facade-to-worker instruction.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Create (or replace) the state machine for `address`
    Configure {
        address: Url,
        config: ConnectionConfig,
    },
    Open,
    Close {
        code: CloseCode,
        reason: Option<String>,
    },
    Reconnect,
    Send {
        payload: Payload,
        queue_while_offline: bool,
    },
    Json {
        payload: Value,
        queue_while_offline: bool,
    },
}

/// Worker-to-facade notification.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Opened,
    Closed {
        code: CloseCode,
        reason: Option<String>,
    },
    Errored {
        message: String,
    },
    /// Precedes [`Event::Opened`] when the connection was re-established
    Reconnected,
    MaxAttemptsReached,
    Message(Payload),
}

/// The facade's end of the bridge.
#[non_exhaustive]
#[derive(Debug)]
pub struct FacadePort {
    pub commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub status: watch::Receiver<Phase>,
}

/// The worker's end of the bridge.
#[non_exhaustive]
#[derive(Debug)]
pub struct WorkerPort {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub events: mpsc::UnboundedSender<Event>,
    pub status: watch::Sender<Phase>,
}

/// Create a connected pair of bridge ports.
#[must_use]
pub fn channel() -> (FacadePort, WorkerPort) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(Phase::Idle);

    (
        FacadePort {
            commands: commands_tx,
            events: events_rx,
            status: status_rx,
        },
        WorkerPort {
            commands: commands_rx,
            events: events_tx,
            status: status_tx,
        },
    )
}
