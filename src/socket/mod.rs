//! The socket primitive consumed by the connection state machine.
//!
//! A [`Connector`] opens sockets. Each call returns a [`SocketHandle`] immediately and reports
//! the socket's lifecycle later through the [`SocketEvents`] it was given, mirroring a
//! callback-style socket: `open`, any number of `message`s, optionally `error`, and exactly
//! one `close` as the final event.
//!
//! # Example
//!
//! ```ignore
//! struct Loopback;
//!
//! impl Connector for Loopback {
//!     fn connect(&self, _request: ConnectRequest<'_>, events: SocketEvents) -> SocketHandle {
//!         let (handle, _outgoing) = SocketHandle::channel();
//!         events.open();
//!         handle
//!     }
//! }
//! ```

#[cfg(feature = "tungstenite")]
pub mod tungstenite;

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use crate::machine::Input;
use crate::types::{CloseCode, Payload};

/// Everything a [`Connector`] needs to open one socket.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'req> {
    pub address: &'req Url,
    pub protocols: &'req [String],
    pub connect_timeout: Duration,
}

/// Opens sockets on behalf of the state machine.
pub trait Connector: Send + Sync + 'static {
    /// Start connecting to `request.address`.
    ///
    /// Must not block: the handshake runs elsewhere and its outcome is reported through
    /// `events`. Dropping the returned handle must close the socket without reporting
    /// further events.
    fn connect(&self, request: ConnectRequest<'_>, events: SocketEvents) -> SocketHandle;
}

/// Instruction sent from the state machine to a live socket.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Frame(Payload),
    Close {
        code: CloseCode,
        reason: Option<String>,
    },
}

/// Owning handle to one socket. Replaced, never reused, on each connect.
#[derive(Debug)]
pub struct SocketHandle {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl SocketHandle {
    /// Create a handle together with the receiver the socket implementation drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        (Self { outgoing }, rx)
    }

    pub(crate) fn send(&self, payload: Payload) {
        _ = self.outgoing.send(Outgoing::Frame(payload));
    }

    pub(crate) fn close(&self, code: CloseCode, reason: Option<String>) {
        _ = self.outgoing.send(Outgoing::Close { code, reason });
    }
}

/// Lifecycle notification from a socket.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(Payload),
    Error(SocketError),
    Close {
        code: CloseCode,
        reason: Option<String>,
    },
}

/// Reporter a [`Connector`] uses to feed one socket's events back to the state machine.
///
/// Events are tagged with the generation of the socket they belong to, so anything reported
/// after the socket was replaced is discarded.
#[derive(Debug, Clone)]
pub struct SocketEvents {
    generation: u64,
    inputs: mpsc::UnboundedSender<Input>,
}

impl SocketEvents {
    pub(crate) fn new(generation: u64, inputs: mpsc::UnboundedSender<Input>) -> Self {
        Self { generation, inputs }
    }

    pub fn open(&self) {
        self.emit(SocketEvent::Open);
    }

    pub fn message(&self, payload: Payload) {
        self.emit(SocketEvent::Message(payload));
    }

    pub fn error(&self, error: SocketError) {
        self.emit(SocketEvent::Error(error));
    }

    pub fn close(&self, code: CloseCode, reason: Option<String>) {
        self.emit(SocketEvent::Close { code, reason });
    }

    /// Whether the state machine is still listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inputs.is_closed()
    }

    fn emit(&self, event: SocketEvent) {
        _ = self.inputs.send(Input::Socket {
            generation: self.generation,
            event,
        });
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketErrorKind {
    /// Nothing is listening at the address; handled as a retryable failure.
    ConnectionRefused,
    /// The opening handshake did not finish within the connect timeout.
    TimedOut,
    Other,
}

/// Socket-level failure. Surfaced to the caller as an event, never returned as an error.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketError {
    pub kind: SocketErrorKind,
    pub message: String,
}

impl SocketError {
    #[must_use]
    pub fn new<S: Into<String>>(kind: SocketErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_connection_refused(&self) -> bool {
        self.kind == SocketErrorKind::ConnectionRefused
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SocketErrorKind::ConnectionRefused => write!(f, "connection refused: {}", self.message),
            SocketErrorKind::TimedOut => write!(f, "handshake timed out: {}", self.message),
            SocketErrorKind::Other => write!(f, "{}", self.message),
        }
    }
}

impl StdError for SocketError {}
