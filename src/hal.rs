// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HAL adapter façade (spec §4.7, §6) — external collaborator contract.
//!
//! The core never talks to firmware directly. It submits a [`HalCall`]
//! through a `HalAdapter` implementation (owned by the IPC/driver layer,
//! out of this crate's scope) and later receives the outcome as an
//! [`event::Event::Response`] or [`event::Event::Notification`] pushed back
//! onto the dispatcher — never synchronously.

use crate::ids::{MacAddr, PeerInstanceId, PubSubId, SessionId, TransactionId};
use crate::nan_config::ConfigRequest;

/// A concrete capability/feature set reported by firmware, opaque to the
/// core beyond what the config merger and callers need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub max_concurrent_sessions: u32,
    pub max_followup_message_length: u32,
    pub supports_5g_band: bool,
}

/// One outbound call to the HAL adapter, tagged with the transaction id
/// allocated for it (or `TransactionId::NONE` for calls spec §4.2 says
/// don't require a round-trip).
#[derive(Debug, Clone)]
pub enum HalCall {
    EnableAndConfigure { tx: TransactionId, config: ConfigRequest, initial: bool },
    Disable { tx: TransactionId },
    Publish { tx: TransactionId, pub_sub_id: PubSubId, config: ConfigRequest },
    Subscribe { tx: TransactionId, pub_sub_id: PubSubId, config: ConfigRequest },
    SendFollowonMessage {
        tx: TransactionId,
        session_id: SessionId,
        peer_id: PeerInstanceId,
        payload: bytes::Bytes,
        message_id: i32,
    },
    GetCapabilities { tx: TransactionId },
    CreateInterface { tx: TransactionId, name: String },
    DeleteInterface { tx: TransactionId, name: String },
    InitiateDataPath { tx: TransactionId, network_specifier: String, peer_mac: MacAddr },
    RespondToDataPath {
        tx: TransactionId,
        accept: bool,
        ndp_id: u32,
        network_specifier: String,
    },
    EndDataPath { tx: TransactionId, ndp_id: u32 },
    /// Fire-and-forget session teardown (spec §4.3 `TERMINATE_SESSION`): no
    /// transaction id, no response expected, submitted right before the
    /// session is dropped from the registry.
    CancelSession { pub_sub_id: PubSubId },
    Deinit,
}

impl HalCall {
    /// The transaction id this call is tagged with, if it requires a
    /// HAL round-trip (spec §4.2).
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::EnableAndConfigure { tx, .. }
            | Self::Disable { tx }
            | Self::Publish { tx, .. }
            | Self::Subscribe { tx, .. }
            | Self::SendFollowonMessage { tx, .. }
            | Self::GetCapabilities { tx }
            | Self::CreateInterface { tx, .. }
            | Self::DeleteInterface { tx, .. }
            | Self::InitiateDataPath { tx, .. }
            | Self::RespondToDataPath { tx, .. }
            | Self::EndDataPath { tx, .. } => Some(*tx),
            Self::CancelSession { .. } | Self::Deinit => None,
        }
    }
}

/// Responses to HAL commands, arriving asynchronously and matched back by
/// `tx` to the command that caused them (spec §4.2, §6).
#[derive(Debug, Clone)]
pub enum HalResponse {
    ConfigSuccess { tx: TransactionId },
    ConfigFail { tx: TransactionId, reason: crate::error::ReasonCode },
    SessionConfigSuccess { tx: TransactionId, is_publish: bool, pub_sub_id: PubSubId },
    SessionConfigFail { tx: TransactionId, reason: crate::error::ReasonCode },
    MessageSendQueuedSuccess { tx: TransactionId },
    MessageSendQueuedFail { tx: TransactionId, reason: crate::error::ReasonCode },
    CapabilitiesUpdated { tx: TransactionId, caps: Capabilities },
    CreateInterfaceResp { tx: TransactionId, ok: bool, reason: Option<crate::error::ReasonCode> },
    DeleteInterfaceResp { tx: TransactionId, ok: bool, reason: Option<crate::error::ReasonCode> },
    InitiateDataPathSuccess { tx: TransactionId, ndp_id: u32 },
    InitiateDataPathFail { tx: TransactionId, reason: crate::error::ReasonCode },
    RespondToDataPathSetupResp {
        tx: TransactionId,
        ok: bool,
        reason: Option<crate::error::ReasonCode>,
    },
    EndDataPathResp { tx: TransactionId, ok: bool, reason: Option<crate::error::ReasonCode> },
}

impl HalResponse {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Self::ConfigSuccess { tx }
            | Self::ConfigFail { tx, .. }
            | Self::SessionConfigSuccess { tx, .. }
            | Self::SessionConfigFail { tx, .. }
            | Self::MessageSendQueuedSuccess { tx }
            | Self::MessageSendQueuedFail { tx, .. }
            | Self::CapabilitiesUpdated { tx, .. }
            | Self::CreateInterfaceResp { tx, .. }
            | Self::DeleteInterfaceResp { tx, .. }
            | Self::InitiateDataPathSuccess { tx, .. }
            | Self::InitiateDataPathFail { tx, .. }
            | Self::RespondToDataPathSetupResp { tx, .. }
            | Self::EndDataPathResp { tx, .. } => *tx,
        }
    }
}

/// Firmware-initiated notifications, processed unconditionally regardless
/// of FSM state (spec §4.2, §6).
#[derive(Debug, Clone)]
pub enum HalNotification {
    InterfaceAddressChange { mac: MacAddr },
    ClusterChange { started: bool, cluster_id: u64 },
    Match {
        pub_sub_id: PubSubId,
        peer_id: PeerInstanceId,
        peer_mac: MacAddr,
        ssi: Vec<u8>,
        filter: Vec<u8>,
    },
    SessionTerminated { pub_sub_id: PubSubId, reason: crate::error::ReasonCode },
    MessageReceived { pub_sub_id: PubSubId, peer_id: PeerInstanceId, peer_mac: MacAddr, payload: Vec<u8> },
    NanDown { reason: crate::error::ReasonCode },
    MessageSendSuccess { tx: TransactionId },
    MessageSendFail { tx: TransactionId, reason: crate::error::ReasonCode },
    DataPathRequest { pub_sub_id: PubSubId, peer_mac: MacAddr, ndp_id: u32, app_info: Vec<u8> },
    /// `network_specifier` correlates this confirmation back to the
    /// [`crate::datapath_timers::DataPathConfirmTimers`] registration made
    /// at initiate/accept time (spec §4.5); the real firmware event only
    /// carries `ndp_id`, so the HAL adapter layer is responsible for
    /// threading the specifier through from its own request bookkeeping.
    DataPathConfirm {
        ndp_id: u32,
        peer_mac: MacAddr,
        accept: bool,
        reason: Option<crate::error::ReasonCode>,
        app_info: Vec<u8>,
        network_specifier: String,
    },
    DataPathEnd { ndp_id: u32 },
}

/// Submission contract for HAL-bound calls. Implemented by the driver layer
/// outside this crate's scope; the core only ever holds a `dyn HalAdapter`.
pub trait HalAdapter: Send {
    /// Submit a call for firmware processing. Returns `Err` only on
    /// submission failure (e.g. the HAL channel is closed) — firmware-level
    /// rejection arrives later as a [`HalResponse`].
    fn submit(&self, call: HalCall) -> anyhow::Result<()>;
}

#[cfg(test)]
#[path = "hal_tests.rs"]
mod tests;
