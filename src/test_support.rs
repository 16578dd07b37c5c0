// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles shared across module test suites.
//!
//! Grounded on the teacher's `crates/cli/src/test_support.rs`: a handful of
//! recording fakes, not a full mocking framework.

use std::sync::{Arc, Mutex};

use crate::callbacks::{ClientCallbacks, DataPathManager, DispatcherHandle, SessionCallbacks};
use crate::dispatcher::EventSender;
use crate::error::ReasonCode;
use crate::hal::{HalAdapter, HalCall, HalResponse};
use crate::ids::{MacAddr, MessageId, PeerInstanceId, PubSubId, SessionId};

/// Records every callback invocation for later assertions.
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, call: impl Into<String>) {
        #[allow(clippy::unwrap_used)]
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used)]
        self.calls.lock().unwrap().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.snapshot().iter().filter(|c| c.contains(needle)).count()
    }
}

/// `ClientCallbacks` that records every invocation onto a shared [`Recorder`].
pub struct RecordingClientCallbacks {
    pub recorder: Arc<Recorder>,
    pub client_id: i32,
}

impl ClientCallbacks for RecordingClientCallbacks {
    fn on_connect_success(&self) {
        self.recorder.push(format!("client[{}].on_connect_success", self.client_id));
    }

    fn on_connect_fail(&self, reason: ReasonCode) {
        self.recorder.push(format!("client[{}].on_connect_fail({reason})", self.client_id));
    }

    fn on_interface_address_change(&self, mac: MacAddr) {
        self.recorder
            .push(format!("client[{}].on_interface_address_change({mac})", self.client_id));
    }

    fn on_cluster_change(&self, started: bool, cluster_id: u64) {
        self.recorder.push(format!(
            "client[{}].on_cluster_change({started}, {cluster_id})",
            self.client_id
        ));
    }
}

/// `SessionCallbacks` that records every invocation onto a shared [`Recorder`].
pub struct RecordingSessionCallbacks {
    pub recorder: Arc<Recorder>,
    pub label: String,
}

impl SessionCallbacks for RecordingSessionCallbacks {
    fn on_session_started(&self, session_id: SessionId) {
        self.recorder.push(format!("{}.on_session_started({})", self.label, session_id.0));
    }

    fn on_session_config_success(&self, pub_sub_id: PubSubId) {
        self.recorder
            .push(format!("{}.on_session_config_success({})", self.label, pub_sub_id.0));
    }

    fn on_session_config_fail(&self, reason: ReasonCode) {
        self.recorder.push(format!("{}.on_session_config_fail({reason})", self.label));
    }

    fn on_session_terminated(&self, reason: ReasonCode) {
        self.recorder.push(format!("{}.on_session_terminated({reason})", self.label));
    }

    fn on_match(&self, peer_id: PeerInstanceId, peer_mac: MacAddr, ssi: Vec<u8>, filter: Vec<u8>) {
        self.recorder.push(format!(
            "{}.on_match({}, {peer_mac}, ssi={}B, filter={}B)",
            self.label,
            peer_id.0,
            ssi.len(),
            filter.len()
        ));
    }

    fn on_message_received(&self, peer_id: PeerInstanceId, peer_mac: MacAddr, payload: Vec<u8>) {
        self.recorder.push(format!(
            "{}.on_message_received({}, {peer_mac}, {}B)",
            self.label,
            peer_id.0,
            payload.len()
        ));
    }

    fn on_message_send_success(&self, message_id: MessageId) {
        self.recorder.push(format!("{}.on_message_send_success({})", self.label, message_id.0));
    }

    fn on_message_send_fail(&self, message_id: MessageId, reason: ReasonCode) {
        self.recorder
            .push(format!("{}.on_message_send_fail({}, {reason})", self.label, message_id.0));
    }

    fn on_ranging_failure(&self, reason: ReasonCode) {
        self.recorder.push(format!("{}.on_ranging_failure({reason})", self.label));
    }
}

/// `DataPathManager` that records timeout/NAN-down notifications.
pub struct RecordingDataPathManager {
    pub recorder: Arc<Recorder>,
}

impl DataPathManager for RecordingDataPathManager {
    fn create_all_data_path_interfaces(&self) {
        self.recorder.push("datapath.create_all_interfaces".to_owned());
    }

    fn delete_all_data_path_interfaces(&self) {
        self.recorder.push("datapath.delete_all_interfaces".to_owned());
    }

    fn handle_data_path_request(&self, pub_sub_id: PubSubId, peer_mac: MacAddr, ndp_id: u32, app_info: Vec<u8>) {
        self.recorder.push(format!(
            "datapath.request(pub_sub_id={}, {peer_mac}, ndp_id={ndp_id}, app_info={}B)",
            pub_sub_id.0,
            app_info.len()
        ));
    }

    fn handle_data_path_confirm(
        &self,
        ndp_id: u32,
        peer_mac: MacAddr,
        accept: bool,
        reason: Option<ReasonCode>,
        app_info: Vec<u8>,
    ) {
        self.recorder.push(format!(
            "datapath.confirm(ndp_id={ndp_id}, {peer_mac}, accept={accept}, reason={reason:?}, app_info={}B)",
            app_info.len()
        ));
    }

    fn handle_data_path_end(&self, ndp_id: u32) {
        self.recorder.push(format!("datapath.end(ndp_id={ndp_id})"));
    }

    fn handle_data_path_timeout(&self, network_specifier: &str) {
        self.recorder.push(format!("datapath.timeout({network_specifier})"));
    }

    fn handle_nan_down(&self) {
        self.recorder.push("datapath.nan_down".to_owned());
    }
}

/// No-op dispatcher handle for tests that don't exercise the send-message
/// queue's self-scheduling.
pub struct NoopDispatcherHandle;

impl DispatcherHandle for NoopDispatcherHandle {
    fn schedule_transmit_next_message(&self) {}
}

/// `HalAdapter` that records every call it receives and never fails
/// submission. Pair with [`crate::dispatcher::Dispatcher`] to script
/// responses back in by hand.
pub struct RecordingHal {
    pub recorder: Arc<Recorder>,
}

impl HalAdapter for RecordingHal {
    fn submit(&self, call: HalCall) -> anyhow::Result<()> {
        self.recorder.push(format!("hal.submit({call:?})"));
        Ok(())
    }
}

/// `HalAdapter` that answers each `submit` with a scripted [`HalResponse`],
/// pushed back through the dispatcher's [`EventSender`] — standing in for
/// an asynchronous firmware reply arriving over the HAL's own back-channel
/// (spec §4.7). `respond` is called once per `submit`; return `None` to
/// simulate firmware staying silent (command-timeout scenarios). Every
/// submitted call is also kept (clone) in `calls`, for tests that need to
/// recover the transaction id a round-trip was allocated.
pub struct ScriptedHal<F> {
    pub events: EventSender,
    pub calls: Arc<Mutex<Vec<HalCall>>>,
    pub respond: F,
}

impl<F> ScriptedHal<F>
where
    F: Fn(&HalCall) -> Option<HalResponse> + Send + Sync,
{
    pub fn new(events: EventSender, respond: F) -> Self {
        Self { events, calls: Arc::new(Mutex::new(Vec::new())), respond }
    }

    pub fn calls_handle(&self) -> Arc<Mutex<Vec<HalCall>>> {
        self.calls.clone()
    }
}

impl<F> HalAdapter for ScriptedHal<F>
where
    F: Fn(&HalCall) -> Option<HalResponse> + Send + Sync,
{
    fn submit(&self, call: HalCall) -> anyhow::Result<()> {
        #[allow(clippy::unwrap_used)]
        self.calls.lock().unwrap().push(call.clone());
        if let Some(response) = (self.respond)(&call) {
            self.events.send_response(response);
        }
        Ok(())
    }
}

/// Pull the transaction id out of the last recorded call matching `pred`.
pub fn last_call_tx(calls: &Arc<Mutex<Vec<HalCall>>>, pred: impl Fn(&HalCall) -> bool) -> Option<crate::ids::TransactionId> {
    #[allow(clippy::unwrap_used)]
    calls.lock().unwrap().iter().rev().find(|c| pred(c)).and_then(HalCall::transaction_id)
}
