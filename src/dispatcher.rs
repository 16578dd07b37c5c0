// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-consumer event loop (spec §4.1, §5).
//!
//! Grounded on `crates/cli/src/session/run.rs`'s `Session::run` select-loop:
//! one task drains a channel serially, `tokio_util::sync::CancellationToken`
//! for shutdown, detached `tokio::spawn` tasks for timers that feed their
//! expiry back through the same channel rather than mutating state directly
//! (`crates/cli/src/session/groom.rs`).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::callbacks::DispatcherHandle;
use crate::event::{Command, Event, TimeoutEvent};
use crate::hal::{HalNotification, HalResponse};

/// Implemented by the state manager; the dispatcher knows nothing about NAN
/// semantics, only how to feed it events in the right order.
pub trait EventSink {
    /// Pop one event off the defer side-buffer, if any (spec §4.1, §9).
    /// Checked before every fresh dequeue so deferred events are replayed
    /// ahead of newly arrived ones.
    fn pop_deferred(&mut self) -> Option<Event>;

    /// Process one event to completion. Never blocks — HAL calls are
    /// fire-and-forget submissions whose outcome arrives as a later event.
    fn handle(&mut self, event: Event);
}

/// Owns the event channel and runs the dispatch loop. Construct with
/// [`Dispatcher::new`]; clone the returned [`EventSender`] for every
/// producer (control API callers, the HAL adapter's notification
/// back-channel, timer tasks).
pub struct Dispatcher {
    rx: mpsc::Receiver<Event>,
    shutdown: CancellationToken,
}

/// A cloneable, non-owning handle used to post events onto the dispatcher's
/// queue — the "cyclic reference" design note's resolution (spec §9):
/// collaborators (the data-path manager, timer tasks) hold this instead of
/// a reference back into the state manager.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn send_command(&self, command: Command) {
        if let Err(err) = self.tx.try_send(Event::Command(command)) {
            debug!(%err, "dispatcher: dropping command, channel full or closed");
        }
    }

    pub async fn send_command_async(&self, command: Command) -> anyhow::Result<()> {
        self.tx.send(Event::Command(command)).await.map_err(|e| anyhow::anyhow!("{e}"))
    }

    /// Post a HAL response back onto the dispatcher. The HAL adapter layer
    /// (out of this crate's scope, spec §4.7) holds a clone of this sender
    /// and calls this the moment firmware answers a previously-submitted
    /// `HalCall`, matched back to its command by `transaction_id`.
    pub fn send_response(&self, response: HalResponse) {
        if let Err(err) = self.tx.try_send(Event::Response(response)) {
            debug!(%err, "dispatcher: dropping response, channel full or closed");
        }
    }

    /// Post a firmware-initiated notification onto the dispatcher (spec
    /// §4.7, §6). Processed unconditionally, regardless of FSM state.
    pub fn send_notification(&self, notification: HalNotification) {
        if let Err(err) = self.tx.try_send(Event::Notification(notification)) {
            debug!(%err, "dispatcher: dropping notification, channel full or closed");
        }
    }

    fn send_timeout_blocking(&self, event: TimeoutEvent) {
        if let Err(err) = self.tx.try_send(Event::Timeout(event)) {
            debug!(%err, "dispatcher: dropping timeout, channel full or closed");
        }
    }
}

impl DispatcherHandle for EventSender {
    fn schedule_transmit_next_message(&self) {
        self.send_command(Command::TransmitNextMessage);
    }
}

impl Dispatcher {
    /// Build a dispatcher with the given channel capacity hint
    /// (`Config::event_queue_capacity`). Returns the dispatcher and the
    /// sender handle producers should be given.
    pub fn new(capacity: usize, shutdown: CancellationToken) -> (Self, EventSender) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { rx, shutdown }, EventSender { tx })
    }

    /// Drain events until the channel closes or shutdown is requested,
    /// handing each to `sink` in order (defer buffer first).
    ///
    /// At most one deferred event is replayed per iteration, always paired
    /// with one real attempt to read the channel. A deferred command that
    /// cannot yet be admitted (gate still busy) re-defers itself — looping
    /// on `pop_deferred` alone before ever touching the channel would spin
    /// forever in that case, starving the very response that would clear
    /// the gate. Replaying once and always falling through to `rx.recv()`
    /// guarantees the channel is never starved.
    pub async fn run(mut self, sink: &mut impl EventSink) {
        loop {
            if let Some(event) = sink.pop_deferred() {
                sink.handle(event);
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("dispatcher: shutdown requested, stopping");
                    break;
                }
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => sink.handle(event),
                        None => {
                            debug!("dispatcher: event channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Spawn an uncancellable wake-timer that feeds a [`TimeoutEvent`] back
/// through `sender` after `delay` (HAL command-response timeout, whose
/// gate state makes a stale firing harmless — it's checked against the
/// still-in-flight transaction id and dropped otherwise).
pub fn spawn_timeout(delay: Duration, sender: EventSender, event: TimeoutEvent) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        sender.send_timeout_blocking(event);
    })
}

/// Spawn a wake-timer that can be cancelled early via `token` (data-path
/// confirm timeout, spec §4.5; the send-message timeout, spec §4.4, which
/// must stay a single replaceable timer rather than one per enqueue).
pub fn spawn_cancellable_timeout(
    delay: Duration,
    sender: EventSender,
    event: TimeoutEvent,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                sender.send_timeout_blocking(event);
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
