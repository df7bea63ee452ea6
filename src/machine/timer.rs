//! Cancellable scheduled actions that report back into the machine's input queue.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::Input;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    /// Settle delay before a non-urgent reopen.
    DeferredOpen,
    /// Wait between a retryable close and the reconnect it triggers.
    Backoff,
    Heartbeat,
    ReconnectWindow,
}

/// Holds at most one armed timer of a given kind.
///
/// Arming cancels whatever was armed before. Every arm gets a fresh sequence number and only
/// fires carrying the current one are accepted, so a tick that was already queued when its
/// timer got cancelled is ignored.
#[derive(Debug)]
pub(crate) struct TimerSlot {
    kind: TimerKind,
    seq: u64,
    armed: Option<DropGuard>,
}

impl TimerSlot {
    pub(crate) fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            seq: 0,
            armed: None,
        }
    }

    /// Fire once after `delay`.
    pub(crate) fn once(&mut self, delay: Duration, inputs: &mpsc::UnboundedSender<Input>) {
        let (token, seq) = self.rearm();
        let kind = self.kind;
        let inputs = inputs.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = sleep(delay) => {
                    _ = inputs.send(Input::Timer { kind, seq });
                }
            }
        });
    }

    /// Fire every `period`, first after one full period.
    pub(crate) fn every(&mut self, period: Duration, inputs: &mpsc::UnboundedSender<Input>) {
        let (token, seq) = self.rearm();
        let kind = self.kind;
        let inputs = inputs.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if inputs.send(Input::Timer { kind, seq }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub(crate) fn cancel(&mut self) {
        self.armed = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Whether a fire tagged `seq` belongs to the currently armed timer.
    pub(crate) fn accepts(&self, seq: u64) -> bool {
        self.armed.is_some() && self.seq == seq
    }

    fn rearm(&mut self) -> (CancellationToken, u64) {
        self.cancel();
        self.seq = self.seq.wrapping_add(1);

        let token = CancellationToken::new();
        self.armed = Some(token.clone().drop_guard());
        (token, self.seq)
    }
}
