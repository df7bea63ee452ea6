//! The foreground facade.

use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use url::Url;

use crate::Result;
use crate::bridge::{self, Command, Event, FacadePort, Worker};
use crate::config::ConnectionConfig;
use crate::error::{BridgeClosed, Error, MissingRuntime};
use crate::machine::Phase;
use crate::socket::Connector;
use crate::types::{CloseCode, Payload};

type Notify = Arc<dyn Fn() + Send + Sync>;
type OnClose = Arc<dyn Fn(CloseCode, Option<String>) + Send + Sync>;
type OnError = Arc<dyn Fn(String) + Send + Sync>;
type OnMessage = Arc<dyn Fn(Payload) + Send + Sync>;

/// Resilient WebSocket client.
///
/// The connection itself lives in a background worker task; every method here only enqueues a
/// command for it and returns immediately. Outcomes come back through the `on_*` callbacks,
/// which run on a dedicated dispatcher task, one event at a time.
///
/// Cloning is cheap and every clone drives the same connection. Once the last clone is
/// dropped the worker shuts down, closing the socket and cancelling its timers. A callback
/// that owns a clone keeps the connection alive forever; capture a [`WeakClient`] from
/// [`Client::downgrade`] instead.
///
/// # Examples
///
/// ```rust, no_run
/// use sockrates::{Client, ConnectionConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ConnectionConfig::builder().max_attempts(5).build();
///     let client = Client::new("wss://echo.websocket.org", config)?;
///
///     client.on_message(|payload| println!("received {payload:?}"));
///     client.send("hello", true)?;
///
///     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Non-owning handle to a [`Client`], for use inside its own callbacks.
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    /// The client, unless every [`Client`] handle has been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

struct ClientInner {
    commands: tokio::sync::mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Phase>,
    callbacks: Arc<Callbacks>,
}

#[derive(Default)]
struct Callbacks {
    open: RwLock<Option<Notify>>,
    close: RwLock<Option<OnClose>>,
    error: RwLock<Option<OnError>>,
    reconnect: RwLock<Option<Notify>>,
    max_attempts_reached: RwLock<Option<Notify>>,
    message: RwLock<Option<OnMessage>>,
}

impl Client {
    /// Create a client that connects over [`tokio_tungstenite`].
    ///
    /// Nothing is connected until the first [`Client::open`], [`Client::send`] or
    /// [`Client::json`].
    ///
    /// # Errors
    ///
    /// Fails with [`crate::error::Kind::Environment`] when called outside a tokio runtime and
    /// with [`crate::error::Kind::Validation`] when `address` is not a `ws://` or `wss://` URL.
    #[cfg(feature = "tungstenite")]
    pub fn new(address: &str, config: ConnectionConfig) -> Result<Self> {
        Self::with_connector(
            address,
            config,
            crate::socket::tungstenite::TungsteniteConnector::default(),
        )
    }

    /// Create a client whose sockets are opened by `connector`.
    ///
    /// # Errors
    ///
    /// Same as [`Client::new`].
    pub fn with_connector<C: Connector>(
        address: &str,
        config: ConnectionConfig,
        connector: C,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_e| MissingRuntime)?;
        let address = parse_address(address)?;

        let (
            FacadePort {
                commands,
                mut events,
                status,
            },
            port,
        ) = bridge::channel();
        runtime.spawn(Worker::new(port, connector).run());

        let callbacks = Arc::new(Callbacks::default());
        let dispatcher = Arc::clone(&callbacks);
        runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                dispatcher.dispatch(event);
            }
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(%address, "Created WebSocket client");

        commands
            .send(Command::Configure { address, config })
            .map_err(|_e| BridgeClosed)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                commands,
                status,
                callbacks,
            }),
        })
    }

    /// Replace the connection target and settings.
    ///
    /// The current socket is closed, pending timers are cancelled and queued payloads are
    /// discarded; the client starts over as if newly created.
    pub fn configure(&self, address: &str, config: ConnectionConfig) -> Result<()> {
        let address = parse_address(address)?;
        self.command(Command::Configure { address, config })
    }

    /// Connect, immediately the first time and after a short settle delay afterwards.
    pub fn open(&self) -> Result<()> {
        self.command(Command::Open)
    }

    /// Close the current socket with a normal closure.
    ///
    /// Note that `1000` is itself a retryable code, so the connection comes back after the
    /// usual backoff unless the reconnect budget is spent.
    pub fn close(&self) -> Result<()> {
        self.close_with(CloseCode::NORMAL, None)
    }

    pub fn close_with(&self, code: CloseCode, reason: Option<String>) -> Result<()> {
        self.command(Command::Close { code, reason })
    }

    /// Start a reconnection cycle; [`Client::on_reconnect`] fires once it succeeds.
    pub fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect)
    }

    /// Send a text or binary payload.
    ///
    /// While disconnected the payload is dropped unless `queue_while_offline` is set, in which
    /// case it is replayed on the next successful open. Either way a connect is triggered.
    pub fn send<P: Into<Payload>>(&self, payload: P, queue_while_offline: bool) -> Result<()> {
        self.command(Command::Send {
            payload: payload.into(),
            queue_while_offline,
        })
    }

    /// Send `payload` serialized as a JSON text frame. Queued JSON is replayed before queued
    /// [`Client::send`] payloads.
    ///
    /// # Errors
    ///
    /// Also fails with [`crate::error::Kind::Internal`] when `payload` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(&self, payload: &T, queue_while_offline: bool) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        self.command(Command::Json {
            payload,
            queue_while_offline,
        })
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The most recently published connection phase.
    #[must_use]
    pub fn status(&self) -> Phase {
        *self.inner.status.borrow()
    }

    /// Receiver that is notified on every phase change.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Phase> {
        self.inner.status.clone()
    }

    pub fn on_open<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        let callback: Notify = Arc::new(callback);
        set(&self.inner.callbacks.open, callback);
    }

    pub fn on_close<F: Fn(CloseCode, Option<String>) + Send + Sync + 'static>(&self, callback: F) {
        let callback: OnClose = Arc::new(callback);
        set(&self.inner.callbacks.close, callback);
    }

    /// Called for socket errors other than a refused connection, which is retried instead.
    pub fn on_error<F: Fn(String) + Send + Sync + 'static>(&self, callback: F) {
        let callback: OnError = Arc::new(callback);
        set(&self.inner.callbacks.error, callback);
    }

    /// Called right before [`Client::on_open`] when the connection was re-established.
    pub fn on_reconnect<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        let callback: Notify = Arc::new(callback);
        set(&self.inner.callbacks.reconnect, callback);
    }

    pub fn on_max_attempts_reached<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        let callback: Notify = Arc::new(callback);
        set(&self.inner.callbacks.max_attempts_reached, callback);
    }

    pub fn on_message<F: Fn(Payload) + Send + Sync + 'static>(&self, callback: F) {
        let callback: OnMessage = Arc::new(callback);
        set(&self.inner.callbacks.message, callback);
    }

    fn command(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_e| BridgeClosed.into())
    }
}

impl Callbacks {
    fn dispatch(&self, event: Event) {
        #[cfg(feature = "tracing")]
        tracing::trace!(?event, "Dispatching event");

        match event {
            Event::Opened => {
                if let Some(callback) = get(&self.open) {
                    callback();
                }
            }
            Event::Closed { code, reason } => {
                if let Some(callback) = get(&self.close) {
                    callback(code, reason);
                }
            }
            Event::Errored { message } => {
                if let Some(callback) = get(&self.error) {
                    callback(message);
                }
            }
            Event::Reconnected => {
                if let Some(callback) = get(&self.reconnect) {
                    callback();
                }
            }
            Event::MaxAttemptsReached => {
                if let Some(callback) = get(&self.max_attempts_reached) {
                    callback();
                }
            }
            Event::Message(payload) => {
                if let Some(callback) = get(&self.message) {
                    callback(payload);
                }
            }
        }
    }
}

// Cloned out of the lock so a callback may replace itself without deadlocking.
fn get<F: ?Sized>(slot: &RwLock<Option<Arc<F>>>) -> Option<Arc<F>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn set<F: ?Sized>(slot: &RwLock<Option<Arc<F>>>, callback: Arc<F>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
}

fn parse_address(address: &str) -> Result<Url> {
    let url = Url::parse(address)?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(Error::validation(format!(
            "unsupported scheme `{scheme}` in {address}, expected ws or wss"
        ))),
    }
}
