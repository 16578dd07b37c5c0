// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single event envelope the dispatcher consumes (spec §4.1).
//!
//! Everything that can happen — a client calling into the control API, a
//! HAL response arriving, a firmware notification, a timer firing — is
//! normalized into one [`Event`] before it reaches the dispatcher's single
//! consumption point. This replaces a stringly-typed bundle with a tagged
//! sum type so the compiler enforces exhaustive handling at each state.

use crate::callbacks::{ClientCallbacks, SessionCallbacks};
use crate::hal::{HalNotification, HalResponse};
use crate::ids::{ClientId, MacAddr, MessageId, PeerInstanceId, SessionId, TransactionId};
use crate::nan_config::ConfigRequest;

/// A control-API invocation from a client, carrying enough identity (and,
/// for the calls that create a new client/session, the callback capability
/// itself) to route the eventual response (spec §4.3, §5).
///
/// Not `Clone`/`Debug`: `Connect`/`Publish`/`Subscribe` carry a boxed
/// callback trait object, which is neither.
pub enum Command {
    Connect {
        client_id: ClientId,
        uid: u32,
        pid: u32,
        calling_package: String,
        config: ConfigRequest,
        notify_identity_change: bool,
        callbacks: Box<dyn ClientCallbacks>,
    },
    Disconnect {
        client_id: ClientId,
    },
    Publish {
        client_id: ClientId,
        config: ConfigRequest,
        callbacks: Box<dyn SessionCallbacks>,
    },
    Subscribe {
        client_id: ClientId,
        config: ConfigRequest,
        callbacks: Box<dyn SessionCallbacks>,
    },
    UpdatePublish {
        client_id: ClientId,
        session_id: SessionId,
        config: ConfigRequest,
    },
    UpdateSubscribe {
        client_id: ClientId,
        session_id: SessionId,
        config: ConfigRequest,
    },
    TerminateSession {
        client_id: ClientId,
        session_id: SessionId,
    },
    SendMessage {
        client_id: ClientId,
        session_id: SessionId,
        peer_id: PeerInstanceId,
        message_id: MessageId,
        payload: bytes::Bytes,
        retry_count: u32,
    },
    StartRanging {
        client_id: ClientId,
        session_id: SessionId,
        peer_id: PeerInstanceId,
    },
    EnableUsage,
    DisableUsage,
    /// Answered via `respond` rather than a client callback: capabilities
    /// are a point-in-time query, not a subscribed stream (spec §6).
    GetCapabilities {
        client_id: ClientId,
        respond: tokio::sync::oneshot::Sender<crate::hal::Capabilities>,
    },
    CreateAllDataPathInterfaces,
    DeleteAllDataPathInterfaces,
    CreateDataPathInterface {
        name: String,
    },
    DeleteDataPathInterface {
        name: String,
    },
    InitiateDataPathSetup {
        network_specifier: String,
        peer_mac: MacAddr,
    },
    RespondToDataPathRequest {
        network_specifier: String,
        ndp_id: u32,
        accept: bool,
    },
    EndDataPath {
        ndp_id: u32,
    },
    /// Self-posted by the send-message queue's back-pressure release
    /// (spec §4.4) rather than by a client.
    TransmitNextMessage,
}

/// One entry in the dispatcher's single-consumer queue (spec §4.1). Not
/// `Clone`/`Debug` for the same reason as [`Command`].
pub enum Event {
    Command(Command),
    Response(HalResponse),
    Notification(HalNotification),
    Timeout(TimeoutEvent),
}

/// The three independent timer families that feed events back into the
/// dispatcher (spec §4.2, §4.4, §4.5).
#[derive(Debug, Clone)]
pub enum TimeoutEvent {
    /// The single in-flight HAL command did not get a response within
    /// `RESPONSE_TIMEOUT`.
    CommandResponse { tx: TransactionId },
    /// A queued send-message did not get a firmware ack within
    /// `SEND_MESSAGE_TIMEOUT`.
    SendMessage { tx: TransactionId },
    /// A data-path setup did not get a confirm within
    /// `DATA_PATH_CONFIRM_TIMEOUT`.
    DataPathConfirm { network_specifier: String },
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
