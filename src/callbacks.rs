// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound capability traits: per-client and per-session callbacks, and the
//! data-path manager's back-channel into the dispatcher.
//!
//! The core only holds a capability (a boxed trait object) and invokes it —
//! it never owns the client's IPC transport. This is the rewrite's answer to
//! the source's per-client IPC callback binder (spec §6, "Out of scope").

use crate::error::ReasonCode;
use crate::ids::{MacAddr, MessageId, PeerInstanceId, PubSubId, SessionId};

/// Capability invoked for events scoped to one connected client.
///
/// Implementations forward these calls across whatever IPC transport the
/// client is attached through; the core never inspects how.
pub trait ClientCallbacks: Send {
    fn on_connect_success(&self);
    fn on_connect_fail(&self, reason: ReasonCode);
    fn on_interface_address_change(&self, mac: MacAddr);
    fn on_cluster_change(&self, started: bool, cluster_id: u64);
}

/// Capability invoked for events scoped to one publish/subscribe session.
pub trait SessionCallbacks: Send {
    fn on_session_started(&self, session_id: SessionId);
    fn on_session_config_success(&self, pub_sub_id: PubSubId);
    fn on_session_config_fail(&self, reason: ReasonCode);
    fn on_session_terminated(&self, reason: ReasonCode);
    fn on_match(&self, peer_id: PeerInstanceId, peer_mac: MacAddr, ssi: Vec<u8>, filter: Vec<u8>);
    fn on_message_received(&self, peer_id: PeerInstanceId, peer_mac: MacAddr, payload: Vec<u8>);
    fn on_message_send_success(&self, message_id: MessageId);
    fn on_message_send_fail(&self, message_id: MessageId, reason: ReasonCode);
    fn on_ranging_failure(&self, reason: ReasonCode);
}

/// Non-owning back-channel the data-path manager uses to schedule follow-up
/// work on the dispatcher (design note: "cyclic reference" resolved as a
/// capability handle, never an owning reference).
pub trait DispatcherHandle: Send + Sync {
    /// Schedule `transmit_next_message` to run on the dispatcher's next turn.
    fn schedule_transmit_next_message(&self);
}

/// External collaborator notified of data-path lifecycle events (spec §6,
/// "Data-path interface lifecycle implementation ... the core only triggers
/// and routes callbacks"). Implemented by the data-path lifecycle manager,
/// which lives outside this crate's scope.
pub trait DataPathManager: Send {
    /// Provision whatever NAN data-path interfaces the platform needs
    /// (spec §6 `create_all_data_path_interfaces`); interface lifecycle
    /// mechanics are entirely this collaborator's concern.
    fn create_all_data_path_interfaces(&self);
    fn delete_all_data_path_interfaces(&self);
    /// A peer asked to set up a data-path on one of our sessions.
    fn handle_data_path_request(&self, pub_sub_id: PubSubId, peer_mac: MacAddr, ndp_id: u32, app_info: Vec<u8>);
    /// The confirm the core was waiting on arrived before its 5s timer fired.
    fn handle_data_path_confirm(
        &self,
        ndp_id: u32,
        peer_mac: MacAddr,
        accept: bool,
        reason: Option<ReasonCode>,
        app_info: Vec<u8>,
    );
    fn handle_data_path_end(&self, ndp_id: u32);
    /// The 5s confirmation timer for `network_specifier` fired with no
    /// matching notification (spec §4.5).
    fn handle_data_path_timeout(&self, network_specifier: &str);
    /// Invoked on `on_nan_down` so the data-path layer can tear down any
    /// in-progress negotiations (spec §5, resource ownership).
    fn handle_nan_down(&self);
}

/// System-wide broadcast emitted on `enable_usage`/`disable_usage` success
/// (spec §6). Grounded on the teacher's `Aggregator` broadcast-hub pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStateChanged {
    pub enabled: bool,
}
