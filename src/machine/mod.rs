//! The connection state machine.
//!
//! A [`Machine`] owns at most one socket and drives it through
//! `Idle -> Connecting -> Open -> Closed -> Connecting | Exhausted`. It never blocks: every
//! wait (settle delay, backoff, heartbeat and reconnect-window checks) is a
//! [`timer::TimerSlot`] that reports back into the same input queue as the socket callbacks,
//! and the hosting worker feeds that queue to [`Machine::handle`] one input at a time.

pub mod backoff;
pub(crate) mod timer;

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use url::Url;

use self::backoff::backoff_delay;
use self::timer::{TimerKind, TimerSlot};
use crate::bridge::Event;
use crate::config::{ConnectionConfig, SETTLE_DELAY, TIMER_RESOLUTION};
use crate::socket::{ConnectRequest, Connector, SocketError, SocketEvent, SocketEvents, SocketHandle};
use crate::types::{CloseCode, Payload};

/// Coarse connection phase, published for observers.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Never connected
    Idle,
    /// A socket handshake is in flight
    Connecting,
    /// Connected
    Open {
        /// When the socket reported open
        since: Instant,
    },
    /// The last socket closed; `retryable` tells whether a reconnect is on its way
    Closed { retryable: bool },
    /// The reconnect budget is spent; only an explicit `open` or `reconnect` resumes
    Exhausted,
}

impl Phase {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Everything that can wake the machine besides a bridge command.
#[derive(Debug)]
pub(crate) enum Input {
    Socket { generation: u64, event: SocketEvent },
    Timer { kind: TimerKind, seq: u64 },
}

struct ActiveSocket {
    generation: u64,
    handle: SocketHandle,
}

pub(crate) struct Machine {
    address: Url,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    /// Loopback for socket events and timer fires
    inputs: mpsc::UnboundedSender<Input>,
    events: mpsc::UnboundedSender<Event>,
    status: watch::Sender<Phase>,

    socket: Option<ActiveSocket>,
    generation: u64,
    attempts: u32,
    connected: bool,
    retrying: bool,
    /// Marks the next connect cycle as a reconnection, and a pending close as a planned rotation
    reconnect_requested: bool,
    first_open: bool,
    json_backlog: VecDeque<Value>,
    send_backlog: VecDeque<Payload>,

    open_timer: TimerSlot,
    backoff_timer: TimerSlot,
    heartbeat_timer: TimerSlot,
    window_timer: TimerSlot,
    last_heartbeat: Instant,
    window_deadline: Instant,
}

impl Machine {
    pub(crate) fn new(
        address: Url,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        inputs: mpsc::UnboundedSender<Input>,
        events: mpsc::UnboundedSender<Event>,
        status: watch::Sender<Phase>,
    ) -> Self {
        status.send_replace(Phase::Idle);
        let now = Instant::now();

        Self {
            address,
            config,
            connector,
            inputs,
            events,
            status,
            socket: None,
            generation: 0,
            attempts: 0,
            connected: false,
            retrying: false,
            reconnect_requested: false,
            first_open: true,
            json_backlog: VecDeque::new(),
            send_backlog: VecDeque::new(),
            open_timer: TimerSlot::new(TimerKind::DeferredOpen),
            backoff_timer: TimerSlot::new(TimerKind::Backoff),
            heartbeat_timer: TimerSlot::new(TimerKind::Heartbeat),
            window_timer: TimerSlot::new(TimerKind::ReconnectWindow),
            last_heartbeat: now,
            window_deadline: now,
        }
    }

    pub(crate) fn handle(&mut self, input: Input) {
        match input {
            Input::Socket { generation, event } => {
                if self
                    .socket
                    .as_ref()
                    .is_none_or(|socket| socket.generation != generation)
                {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(generation, ?event, "Dropping event from a retired socket");
                    return;
                }

                match event {
                    SocketEvent::Open => self.on_open(),
                    SocketEvent::Message(payload) => self.on_message(payload),
                    SocketEvent::Error(error) => self.on_error(&error),
                    SocketEvent::Close { code, reason } => self.on_close(code, reason),
                }
            }
            Input::Timer { kind, seq } => match kind {
                TimerKind::DeferredOpen if self.open_timer.accepts(seq) => {
                    self.open_timer.cancel();
                    self.connect();
                }
                TimerKind::Backoff if self.backoff_timer.accepts(seq) => {
                    self.backoff_timer.cancel();
                    self.reconnect();
                }
                TimerKind::Heartbeat if self.heartbeat_timer.accepts(seq) => self.heartbeat_tick(),
                TimerKind::ReconnectWindow if self.window_timer.accepts(seq) => self.window_tick(),
                _ => {
                    // Fire from a timer that has since been cancelled or re-armed.
                }
            },
        }
    }

    /// Open the connection, immediately on first use or while retrying, otherwise after
    /// [`SETTLE_DELAY`].
    pub(crate) fn open(&mut self) {
        self.open_timer.cancel();

        if self.first_open {
            self.first_open = false;
            self.connect();
        } else if self.retrying {
            self.connect();
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(delay = ?SETTLE_DELAY, "Deferring open");
            self.open_timer.once(SETTLE_DELAY, &self.inputs);
            self.attempts = 0;
        }
    }

    /// Close the current socket. Backlogs, attempts and a pending deferred open are untouched.
    pub(crate) fn close(&mut self, code: CloseCode, reason: Option<String>) {
        match &self.socket {
            Some(socket) => socket.handle.close(code, reason),
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%code, "Close requested without a socket");
            }
        }
    }

    /// Start a reconnection cycle, or report exhaustion when the attempt budget is spent.
    pub(crate) fn reconnect(&mut self) {
        self.reconnect_requested = true;

        if self.attempts_remain() {
            self.attempts = self.attempts.saturating_add(1);
            self.open();
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts = self.attempts, "Reconnect attempts exhausted");
            self.publish(Phase::Exhausted);
            self.emit(Event::MaxAttemptsReached);
        }
    }

    pub(crate) fn send(&mut self, payload: Payload, queue_while_offline: bool) {
        self.attempts = 0;

        match self.live_socket() {
            Some(handle) => handle.send(payload),
            None => {
                if queue_while_offline {
                    self.send_backlog.push_back(payload);
                }
                self.open();
            }
        }
    }

    pub(crate) fn json(&mut self, payload: Value, queue_while_offline: bool) {
        self.attempts = 0;

        match self.live_socket() {
            Some(handle) => handle.send(Payload::Text(payload.to_string())),
            None => {
                if queue_while_offline {
                    self.json_backlog.push_back(payload);
                }
                self.open();
            }
        }
    }

    fn connect(&mut self) {
        if self.connected {
            return;
        }
        if let Some(socket) = &self.socket {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation = socket.generation, "Handshake already in flight");
            #[cfg(not(feature = "tracing"))]
            let _ = &socket;
            return;
        }

        self.open_timer.cancel();
        self.backoff_timer.cancel();
        self.generation = self.generation.wrapping_add(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(generation = self.generation, address = %self.address, "Connecting");

        let request = ConnectRequest {
            address: &self.address,
            protocols: &self.config.protocols,
            connect_timeout: self.config.connect_timeout,
        };
        let events = SocketEvents::new(self.generation, self.inputs.clone());
        let handle = self.connector.connect(request, events);

        self.socket = Some(ActiveSocket {
            generation: self.generation,
            handle,
        });
        self.publish(Phase::Connecting);
    }

    fn on_open(&mut self) {
        if mem::take(&mut self.reconnect_requested) {
            self.emit(Event::Reconnected);
        }
        self.emit(Event::Opened);

        #[cfg(feature = "tracing")]
        tracing::debug!(generation = self.generation, "Connection open");

        self.attempts = 0;
        self.connected = true;
        self.retrying = false;

        let now = Instant::now();
        self.publish(Phase::Open { since: now });

        self.window_timer.cancel();
        self.heartbeat_timer.cancel();
        // A window too large to represent as an instant never elapses.
        if let Some(deadline) = self
            .config
            .reconnect_window()
            .and_then(|window| now.checked_add(window))
        {
            self.window_deadline = deadline;
            self.window_timer.every(TIMER_RESOLUTION, &self.inputs);
        }
        if self.config.heartbeat_interval().is_some() {
            self.last_heartbeat = now;
            self.heartbeat_timer.every(TIMER_RESOLUTION, &self.inputs);
        }

        for payload in mem::take(&mut self.json_backlog) {
            self.json(payload, false);
        }
        for payload in mem::take(&mut self.send_backlog) {
            self.send(payload, false);
        }
    }

    fn on_close(&mut self, code: CloseCode, reason: Option<String>) {
        self.window_timer.cancel();
        self.heartbeat_timer.cancel();
        self.connected = false;
        self.socket = None;

        if self.attempts_remain() {
            self.retrying = true;
        }

        let rotation = self.reconnect_requested;
        self.publish(Phase::Closed {
            retryable: rotation || code.is_retryable(),
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(%code, ?reason, rotation, attempts = self.attempts, "Connection closed");
        self.emit(Event::Closed { code, reason });

        if rotation {
            // Planned rotation: reconnect right away without spending the attempt budget.
            self.attempts = 0;
            self.open();
        } else if code.is_retryable() {
            self.schedule_reconnect();
        } else {
            self.attempts = 0;
        }
    }

    fn on_message(&mut self, payload: Payload) {
        self.emit(Event::Message(payload));
        // Inbound traffic proves liveness as well as a ping would.
        self.last_heartbeat = Instant::now();
    }

    fn on_error(&mut self, error: &SocketError) {
        self.reconnect_requested = false;
        self.connected = false;
        self.window_timer.cancel();
        self.heartbeat_timer.cancel();

        #[cfg(feature = "tracing")]
        tracing::warn!(%error, generation = self.generation, "Socket error");

        if error.is_connection_refused() {
            // Shares the backoff slot with the close that follows, so both trigger one reconnect.
            if !self.retrying {
                self.schedule_reconnect();
            }
        } else {
            self.emit(Event::Errored {
                message: error.to_string(),
            });
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = backoff_delay(self.attempts, &mut rand::rng());

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt = self.attempts, ?delay, "Scheduling reconnect");

        self.backoff_timer.once(delay, &self.inputs);
    }

    fn heartbeat_tick(&mut self) {
        let Some(interval) = self.config.heartbeat_interval() else {
            self.heartbeat_timer.cancel();
            return;
        };
        if !self.connected {
            self.heartbeat_timer.cancel();
            return;
        }

        let now = Instant::now();
        if now.duration_since(self.last_heartbeat) > interval {
            #[cfg(feature = "tracing")]
            tracing::trace!(payload = %self.config.ping_payload, "Sending heartbeat");
            if let Some(socket) = &self.socket {
                socket
                    .handle
                    .send(Payload::Text(self.config.ping_payload.clone()));
            }
            self.last_heartbeat = now;
        }
    }

    fn window_tick(&mut self) {
        if !self.connected {
            self.window_timer.cancel();
            return;
        }

        if Instant::now() > self.window_deadline {
            #[cfg(feature = "tracing")]
            tracing::debug!("Reconnect window elapsed, rotating connection");
            self.reconnect_requested = true;
            self.window_timer.cancel();
            self.close(CloseCode::NORMAL, None);
        }
    }

    fn live_socket(&self) -> Option<&SocketHandle> {
        if !self.connected {
            return None;
        }
        self.socket.as_ref().map(|socket| &socket.handle)
    }

    fn attempts_remain(&self) -> bool {
        self.config
            .attempt_limit()
            .is_none_or(|max| self.attempts < max)
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Event dropped, no facade is listening");
        }
    }

    fn publish(&self, phase: Phase) {
        self.status.send_replace(phase);
    }
}
