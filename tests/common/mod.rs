#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::time::Duration;

use sockrates::Client;
use sockrates::socket::{ConnectRequest, Connector, Outgoing, SocketEvents, SocketHandle};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// A socket handed out by [`ScriptedConnector`]; the test plays the remote side.
pub struct ScriptedSocket {
    pub address: String,
    pub protocols: Vec<String>,
    pub events: SocketEvents,
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

impl ScriptedSocket {
    /// Text frames written so far.
    pub fn written_text(&mut self) -> Vec<String> {
        let mut written = Vec::new();
        while let Ok(outgoing) = self.outgoing.try_recv() {
            if let Outgoing::Frame(payload) = outgoing {
                written.push(payload.as_text().unwrap().to_owned());
            }
        }
        written
    }
}

/// Connector that never touches the network and passes each new socket to the test.
#[derive(Clone)]
pub struct ScriptedConnector {
    sockets: mpsc::UnboundedSender<ScriptedSocket>,
}

impl ScriptedConnector {
    pub fn pair() -> (Self, Sockets) {
        let (sockets, rx) = mpsc::unbounded_channel();
        (Self { sockets }, Sockets(rx))
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, request: ConnectRequest<'_>, events: SocketEvents) -> SocketHandle {
        let (handle, outgoing) = SocketHandle::channel();
        drop(self.sockets.send(ScriptedSocket {
            address: request.address.to_string(),
            protocols: request.protocols.to_vec(),
            events,
            outgoing,
        }));
        handle
    }
}

pub struct Sockets(mpsc::UnboundedReceiver<ScriptedSocket>);

impl Sockets {
    pub async fn next(&mut self) -> ScriptedSocket {
        timeout(Duration::from_secs(30), self.0.recv())
            .await
            .expect("no socket was opened in time")
            .unwrap()
    }

    pub fn none_pending(&mut self) -> bool {
        self.0.try_recv().is_err()
    }
}

/// Register every callback on `client`, recording each invocation as a short string.
pub fn record(client: &Client) -> Recorded {
    let (tx, rx) = mpsc::unbounded_channel::<String>();

    let sink = tx.clone();
    client.on_open(move || drop(sink.send("open".to_owned())));
    let sink = tx.clone();
    client.on_close(move |code, reason| {
        drop(sink.send(format!("close:{code}:{}", reason.unwrap_or_default())));
    });
    let sink = tx.clone();
    client.on_error(move |message| drop(sink.send(format!("error:{message}"))));
    let sink = tx.clone();
    client.on_reconnect(move || drop(sink.send("reconnect".to_owned())));
    let sink = tx.clone();
    client.on_max_attempts_reached(move || drop(sink.send("max_attempts".to_owned())));
    client.on_message(move |payload| {
        let text = payload.as_text().unwrap_or("<binary>").to_owned();
        drop(tx.send(format!("message:{text}")));
    });

    Recorded(rx)
}

pub struct Recorded(mpsc::UnboundedReceiver<String>);

impl Recorded {
    pub async fn next(&mut self) -> String {
        timeout(Duration::from_secs(30), self.0.recv())
            .await
            .expect("no callback fired in time")
            .unwrap()
    }

    pub async fn take(&mut self, count: usize) -> Vec<String> {
        let mut calls = Vec::with_capacity(count);
        for _ in 0..count {
            calls.push(self.next().await);
        }
        calls
    }

    pub fn is_empty(&mut self) -> bool {
        self.0.try_recv().is_err()
    }
}
