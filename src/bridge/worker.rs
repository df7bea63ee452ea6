//! The background actor that hosts the connection state machine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Command, WorkerPort};
use crate::machine::{Input, Machine};
use crate::socket::Connector;

/// Runs the state machine off the caller's task, driven by bridge commands.
///
/// Commands, socket events and timer fires are handled strictly one at a time, so the
/// machine needs no locking. The worker stops when the facade drops its command sender;
/// the machine goes with it, cancelling its timers and closing its socket.
pub struct Worker {
    port: WorkerPort,
    connector: Arc<dyn Connector>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    machine: Option<Machine>,
}

impl Worker {
    #[must_use]
    pub fn new<C: Connector>(port: WorkerPort, connector: C) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        Self {
            port,
            connector: Arc::new(connector),
            inputs_tx,
            inputs_rx,
            machine: None,
        }
    }

    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; check for one first, as
    /// [`crate::Client`] does.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Connection worker started");

        loop {
            tokio::select! {
                biased;

                command = self.port.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }

                Some(input) = self.inputs_rx.recv() => {
                    if let Some(machine) = &mut self.machine {
                        machine.handle(input);
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection worker stopped");
    }

    fn handle_command(&mut self, command: Command) {
        if let Command::Configure { address, config } = command {
            #[cfg(feature = "tracing")]
            tracing::debug!(%address, "Configuring connection");

            // Dropping the previous machine closes its socket and cancels its timers. A fresh
            // input queue keeps its late socket events away from the new machine.
            self.machine = None;
            (self.inputs_tx, self.inputs_rx) = mpsc::unbounded_channel();
            self.machine = Some(Machine::new(
                address,
                config,
                Arc::clone(&self.connector),
                self.inputs_tx.clone(),
                self.port.events.clone(),
                self.port.status.clone(),
            ));
            return;
        }

        let Some(machine) = &mut self.machine else {
            #[cfg(feature = "tracing")]
            tracing::warn!(?command, "Ignoring command received before configure");
            return;
        };

        match command {
            Command::Open => machine.open(),
            Command::Close { code, reason } => machine.close(code, reason),
            Command::Reconnect => machine.reconnect(),
            Command::Send {
                payload,
                queue_while_offline,
            } => machine.send(payload, queue_while_offline),
            Command::Json {
                payload,
                queue_while_offline,
            } => machine.json(payload, queue_while_offline),
            Command::Configure { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use url::Url;

    use super::*;
    use crate::bridge::{Event, channel};
    use crate::config::ConnectionConfig;
    use crate::machine::Phase;
    use crate::socket::mock::MockConnector;
    use crate::types::{CloseCode, Payload};

    fn configure() -> Command {
        Command::Configure {
            address: Url::parse("ws://localhost:9000").unwrap(),
            config: ConnectionConfig::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn commands_before_configure_are_ignored() {
        let connector = MockConnector::default();
        let (facade, port) = channel();
        Worker::new(port, connector.clone()).spawn();

        facade.commands.send(Command::Open).unwrap();
        facade.commands.send(configure()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.count(), 0, "open before configure must be ignored");

        facade.commands.send(Command::Open).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn socket_events_reach_the_facade() {
        let connector = MockConnector::default();
        let (mut facade, port) = channel();
        Worker::new(port, connector.clone()).spawn();

        facade.commands.send(configure()).unwrap();
        facade
            .commands
            .send(Command::Send {
                payload: Payload::Text("hi".to_owned()),
                queue_while_offline: true,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut sockets = connector.take();
        assert_eq!(sockets.len(), 1);
        sockets[0].events.open();
        sockets[0].events.message("hello".into());

        assert_eq!(
            timeout(Duration::from_secs(1), facade.events.recv())
                .await
                .unwrap(),
            Some(Event::Opened)
        );
        assert_eq!(
            timeout(Duration::from_secs(1), facade.events.recv())
                .await
                .unwrap(),
            Some(Event::Message("hello".into()))
        );
        assert!(facade.status.borrow().is_open(), "status should follow the machine");
        assert_eq!(sockets[0].written().len(), 1, "backlog flushed on open");
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_replaces_the_machine() {
        let connector = MockConnector::default();
        let (facade, port) = channel();
        Worker::new(port, connector.clone()).spawn();

        facade.commands.send(configure()).unwrap();
        facade.commands.send(Command::Open).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut first = connector.take();
        first[0].events.open();
        tokio::time::sleep(Duration::from_millis(10)).await;

        facade.commands.send(configure()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*facade.status.borrow(), Phase::Idle);

        // The replaced machine dropped its socket handle.
        assert!(first[0].outgoing.recv().await.is_none(), "old socket should be released");

        assert!(first[0].events.is_closed(), "old socket events have nowhere to go");

        facade.commands.send(Command::Open).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut second = connector.take();
        assert_eq!(second.len(), 1, "fresh machine connects on first open");

        first[0].events.close(CloseCode::ABNORMAL, None);
        second[0].events.open();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(facade.status.borrow().is_open(), "stale close must not reach the new machine");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_facade_stops_the_worker() {
        let (facade, port) = channel();
        let handle = Worker::new(port, MockConnector::default()).spawn();

        drop(facade);

        timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
