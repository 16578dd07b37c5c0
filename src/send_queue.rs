// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier follow-on message queue with retry and back-pressure (spec §4.4).
//!
//! A message lives in exactly one of three places at a time: the **host
//! queue** (`BTreeMap<arrival_seq, _>`, smallest key iterated first), a
//! single **pending-submit** slot while a `send_followon_message` HAL call
//! is in flight for it, or the **firmware queue** (`IndexMap<TransactionId,
//! _>`, insertion order) once firmware has acknowledged accepting it.

use std::time::{Duration, Instant};

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::ReasonCode;
use crate::ids::{ClientId, MessageId, PeerInstanceId, SessionId, TransactionId};

/// Timeout on a firmware-queued message awaiting send completion (spec §4.4).
pub const SEND_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// A follow-on message pending transmission or sitting in the firmware queue.
#[derive(Debug, Clone)]
pub struct QueuedSendMessage {
    pub arrival_seq: u64,
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub peer_id: PeerInstanceId,
    pub payload: Bytes,
    pub message_id: MessageId,
    pub retry_count: u32,
}

struct FirmwareEntry {
    message: QueuedSendMessage,
    enqueue_time: Instant,
}

/// What the caller should do with the result of a queue mutation. Carries
/// the owning `client_id`/`session_id` so the state manager can look up the
/// session's callback capability — the queue itself has no callback handle.
pub enum SendOutcome {
    /// Firmware confirmed delivery; invoke `on_message_send_success`.
    Success { client_id: ClientId, session_id: SessionId, message_id: MessageId },
    /// Firmware rejected the message terminally (or retries are exhausted);
    /// invoke `on_message_send_fail`.
    Failed { client_id: ClientId, session_id: SessionId, message_id: MessageId, reason: ReasonCode },
    /// A retryable failure put the message back in the host queue; no
    /// callback yet.
    Retried,
}

/// The send-message subsystem's queue state, owned by the state manager.
pub struct SendQueue {
    host: std::collections::BTreeMap<u64, QueuedSendMessage>,
    pending_submit: Option<(TransactionId, QueuedSendMessage)>,
    firmware: IndexMap<TransactionId, FirmwareEntry>,
    blocked: bool,
    next_arrival_seq: u64,
    timeout: Duration,
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::with_timeout(SEND_MESSAGE_TIMEOUT)
    }
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a queue with a caller-supplied send-message timeout (spec
    /// §2 ambient stack: `Config::send_message_timeout_ms`), instead of the
    /// spec's fixed 10s default.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            host: std::collections::BTreeMap::new(),
            pending_submit: None,
            firmware: IndexMap::new(),
            blocked: false,
            next_arrival_seq: 0,
            timeout,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn host_len(&self) -> usize {
        self.host.len()
    }

    pub fn firmware_len(&self) -> usize {
        self.firmware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty() && self.firmware.is_empty() && self.pending_submit.is_none()
    }

    /// Submit a new message. Returns its `arrival_seq` and whether the
    /// caller should kick off `transmit_next_message` immediately (the
    /// queue isn't currently `Blocked`).
    pub fn enqueue(
        &mut self,
        client_id: ClientId,
        session_id: SessionId,
        peer_id: PeerInstanceId,
        payload: Bytes,
        message_id: MessageId,
        retry_count: u32,
    ) -> (u64, bool) {
        let arrival_seq = self.next_arrival_seq;
        self.next_arrival_seq += 1;
        self.host.insert(
            arrival_seq,
            QueuedSendMessage { arrival_seq, client_id, session_id, peer_id, payload, message_id, retry_count },
        );
        (arrival_seq, !self.blocked)
    }

    /// Pop the lowest-`arrival_seq` host entry and stage it under `tx` while
    /// its `send_followon_message` HAL call is outstanding. No-op (returns
    /// `None`) if `Blocked` or the host queue is empty.
    pub fn transmit_next(&mut self, tx: TransactionId) -> Option<&QueuedSendMessage> {
        if self.blocked {
            return None;
        }
        let (&key, _) = self.host.iter().next()?;
        let message = self.host.remove(&key)?;
        self.pending_submit = Some((tx, message));
        self.pending_submit.as_ref().map(|(_, m)| m)
    }

    /// Firmware accepted the message into its own queue (spec §4.4 "Queued
    /// OK"). Returns the new send-message-timeout deadline.
    pub fn handle_queued_success(&mut self, tx: TransactionId, now: Instant) -> Option<Instant> {
        let (staged_tx, message) = self.pending_submit.take()?;
        debug_assert_eq!(staged_tx, tx);
        self.firmware.insert(tx, FirmwareEntry { message, enqueue_time: now });
        self.next_timeout_deadline()
    }

    /// Firmware rejected the submission outright (queue full). Re-queues
    /// under the message's original `arrival_seq` and sets `Blocked`.
    pub fn handle_queued_fail(&mut self, tx: TransactionId) {
        let Some((staged_tx, message)) = self.pending_submit.take() else {
            debug!(?tx, "send-queue: queued-fail for unknown pending submission");
            return;
        };
        debug_assert_eq!(staged_tx, tx);
        self.blocked = true;
        self.host.insert(message.arrival_seq, message);
    }

    /// Firmware reports successful over-the-air delivery.
    pub fn handle_send_success(&mut self, tx: TransactionId, now: Instant) -> (Option<SendOutcome>, Option<Instant>) {
        self.blocked = false;
        let Some(entry) = self.firmware.shift_remove(&tx) else {
            debug!(?tx, "send-queue: send-success for unknown transaction (late notification)");
            return (None, self.recompute_deadline(now));
        };
        let outcome = SendOutcome::Success {
            client_id: entry.message.client_id,
            session_id: entry.message.session_id,
            message_id: entry.message.message_id,
        };
        (Some(outcome), self.recompute_deadline(now))
    }

    /// Firmware reports a send failure. Retries transparently for
    /// retryable reasons while `retry_count > 0`.
    pub fn handle_send_fail(
        &mut self,
        tx: TransactionId,
        reason: ReasonCode,
        now: Instant,
    ) -> (Option<SendOutcome>, Option<Instant>) {
        self.blocked = false;
        let Some(entry) = self.firmware.shift_remove(&tx) else {
            debug!(?tx, "send-queue: send-fail for unknown transaction (late notification)");
            return (None, self.recompute_deadline(now));
        };
        let mut message = entry.message;
        let outcome = if message.retry_count > 0 && reason.is_retryable_send_failure() {
            message.retry_count -= 1;
            let arrival_seq = message.arrival_seq;
            self.host.insert(arrival_seq, message);
            SendOutcome::Retried
        } else {
            SendOutcome::Failed {
                client_id: message.client_id,
                session_id: message.session_id,
                message_id: message.message_id,
                reason,
            }
        };
        (Some(outcome), self.recompute_deadline(now))
    }

    /// The send-message-timeout fired. Always expires the firmware queue's
    /// first (earliest-inserted) entry to guarantee forward progress, plus
    /// every subsequent entry whose deadline has also passed, stopping at
    /// the first entry still live. Returns the expired messages in
    /// insertion order, to be failed with [`ReasonCode::Timeout`].
    pub fn expire_on_timeout(&mut self, now: Instant) -> Vec<QueuedSendMessage> {
        let mut expired = Vec::new();
        let mut first = true;
        while let Some((_, entry)) = self.firmware.get_index(0) {
            let deadline = entry.enqueue_time + self.timeout;
            if !first && deadline > now {
                break;
            }
            first = false;
            let Some((_, entry)) = self.firmware.shift_remove_index(0) else {
                break;
            };
            expired.push(entry.message);
        }
        self.blocked = false;
        expired
    }

    /// The deadline the send-message-timeout timer should be armed for, or
    /// `None` if the firmware queue is empty (timer should be cancelled).
    pub fn next_timeout_deadline(&self) -> Option<Instant> {
        self.firmware.values().map(|e| e.enqueue_time + self.timeout).min()
    }

    fn recompute_deadline(&self, _now: Instant) -> Option<Instant> {
        self.next_timeout_deadline()
    }

    /// Whether the host queue should be kicked with `transmit_next_message`
    /// (not blocked and non-empty).
    pub fn should_transmit(&self) -> bool {
        !self.blocked && !self.host.is_empty()
    }

    /// Drop everything (spec §5, §8 invariant 6 — NAN-down purge).
    pub fn clear(&mut self) {
        self.host.clear();
        self.firmware.clear();
        self.pending_submit = None;
        self.blocked = false;
    }
}

#[cfg(test)]
#[path = "send_queue_tests.rs"]
mod tests;
