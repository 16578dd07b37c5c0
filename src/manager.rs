// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The top-level state manager: client/session operations, wired to the
//! FSM, send-message queue, and data-path timers (spec §4.3, §5, §6).
//!
//! Two halves, split the way `crate::dispatcher` splits `Dispatcher` from
//! `EventSender`: [`NanStateManager`] owns all mutable state and is driven
//! exclusively by the dispatcher task via [`EventSink::handle`]; [`NanHandle`]
//! is the cheap, `Clone`, non-owning capability external callers hold to
//! submit control-API calls — the "inject a handle, not a singleton"
//! resolution of the design notes (spec §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::callbacks::{ClientCallbacks, DataPathManager, SessionCallbacks, UsageStateChanged};
use crate::config::Config;
use crate::datapath_timers::DataPathConfirmTimers;
use crate::dispatcher::{self, EventSender, EventSink};
use crate::error::ReasonCode;
use crate::event::{Command, Event, TimeoutEvent};
use crate::fsm::{self, CommandAdmit, CommandGate, ResponseAdmit, TimeoutAdmit};
use crate::hal::{Capabilities, HalAdapter, HalCall, HalNotification, HalResponse};
use crate::ids::{
    ClientId, MacAddr, MessageId, PeerInstanceId, PubSubId, SessionId, SessionIdAllocator, TransactionId,
    TransactionIdAllocator,
};
use crate::nan_config::{self, ConfigRequest};
use crate::registry::{ClientRegistry, ClientState, SessionKind, SessionState};
use crate::send_queue::{SendOutcome, SendQueue};

/// Cheap, `Clone`, non-owning handle to a running [`NanStateManager`].
/// Holds only an [`EventSender`] and the shared `usage_enabled` flag — the
/// one piece of state the design allows to be read without going through
/// the dispatcher (spec §5).
#[derive(Clone)]
pub struct NanHandle {
    events: EventSender,
    usage_enabled: Arc<AtomicBool>,
}

impl NanHandle {
    pub fn connect(
        &self,
        client_id: ClientId,
        uid: u32,
        pid: u32,
        calling_package: String,
        config: ConfigRequest,
        notify_identity_change: bool,
        callbacks: Box<dyn ClientCallbacks>,
    ) {
        self.events.send_command(Command::Connect {
            client_id,
            uid,
            pid,
            calling_package,
            config,
            notify_identity_change,
            callbacks,
        });
    }

    pub fn disconnect(&self, client_id: ClientId) {
        self.events.send_command(Command::Disconnect { client_id });
    }

    pub fn publish(&self, client_id: ClientId, config: ConfigRequest, callbacks: Box<dyn SessionCallbacks>) {
        self.events.send_command(Command::Publish { client_id, config, callbacks });
    }

    pub fn subscribe(&self, client_id: ClientId, config: ConfigRequest, callbacks: Box<dyn SessionCallbacks>) {
        self.events.send_command(Command::Subscribe { client_id, config, callbacks });
    }

    pub fn update_publish(&self, client_id: ClientId, session_id: SessionId, config: ConfigRequest) {
        self.events.send_command(Command::UpdatePublish { client_id, session_id, config });
    }

    pub fn update_subscribe(&self, client_id: ClientId, session_id: SessionId, config: ConfigRequest) {
        self.events.send_command(Command::UpdateSubscribe { client_id, session_id, config });
    }

    pub fn terminate_session(&self, client_id: ClientId, session_id: SessionId) {
        self.events.send_command(Command::TerminateSession { client_id, session_id });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_message(
        &self,
        client_id: ClientId,
        session_id: SessionId,
        peer_id: PeerInstanceId,
        message_id: MessageId,
        payload: bytes::Bytes,
        retry_count: u32,
    ) {
        self.events.send_command(Command::SendMessage {
            client_id,
            session_id,
            peer_id,
            message_id,
            payload,
            retry_count,
        });
    }

    pub fn start_ranging(&self, client_id: ClientId, session_id: SessionId, peer_id: PeerInstanceId) {
        self.events.send_command(Command::StartRanging { client_id, session_id, peer_id });
    }

    pub fn enable_usage(&self) {
        self.events.send_command(Command::EnableUsage);
    }

    pub fn disable_usage(&self) {
        self.events.send_command(Command::DisableUsage);
    }

    /// Read without synchronization through the dispatcher — the one
    /// sanctioned shared atom (spec §5).
    pub fn is_usage_enabled(&self) -> bool {
        self.usage_enabled.load(Ordering::Relaxed)
    }

    /// Capabilities are a point-in-time query, not an event stream, so this
    /// awaits the answer via a oneshot rather than a callback (grounded on
    /// `crates/cli/src/transport/mod.rs`'s `WaitForDrain` request/response
    /// pattern over an actor's command channel).
    pub async fn get_capabilities(&self, client_id: ClientId) -> anyhow::Result<Capabilities> {
        let (respond, rx) = oneshot::channel();
        self.events.send_command_async(Command::GetCapabilities { client_id, respond }).await?;
        rx.await.map_err(|_| anyhow::anyhow!("capabilities request dropped (NAN down or shutting down)"))
    }

    pub fn create_all_data_path_interfaces(&self) {
        self.events.send_command(Command::CreateAllDataPathInterfaces);
    }

    pub fn delete_all_data_path_interfaces(&self) {
        self.events.send_command(Command::DeleteAllDataPathInterfaces);
    }

    pub fn create_data_path_interface(&self, name: String) {
        self.events.send_command(Command::CreateDataPathInterface { name });
    }

    pub fn delete_data_path_interface(&self, name: String) {
        self.events.send_command(Command::DeleteDataPathInterface { name });
    }

    pub fn initiate_data_path_setup(&self, network_specifier: String, peer_mac: MacAddr) {
        self.events.send_command(Command::InitiateDataPathSetup { network_specifier, peer_mac });
    }

    pub fn respond_to_data_path_request(&self, network_specifier: String, ndp_id: u32, accept: bool) {
        self.events.send_command(Command::RespondToDataPathRequest { network_specifier, ndp_id, accept });
    }

    pub fn end_data_path(&self, ndp_id: u32) {
        self.events.send_command(Command::EndDataPath { ndp_id });
    }
}

/// Owns every piece of mutable core state (spec §3). Constructed once per
/// process (spec §9, "avoid a true global") and driven exclusively by
/// [`Dispatcher::run`] through the [`EventSink`] impl below.
pub struct NanStateManager {
    registry: ClientRegistry,
    gate: CommandGate,
    send_queue: SendQueue,
    send_message_timer: Option<CancellationToken>,
    datapath_timers: DataPathConfirmTimers,
    tx_alloc: TransactionIdAllocator,
    session_id_alloc: SessionIdAllocator,
    current_nan_configuration: Option<ConfigRequest>,
    current_discovery_interface_mac: MacAddr,
    usage_enabled: Arc<AtomicBool>,
    capabilities_cache: Option<Capabilities>,
    hal: Box<dyn HalAdapter>,
    data_path_manager: Box<dyn DataPathManager>,
    events: EventSender,
    usage_broadcast: broadcast::Sender<UsageStateChanged>,
    response_timeout: std::time::Duration,
    data_path_confirm_timeout: std::time::Duration,
}

impl NanStateManager {
    /// Build a manager driven by the given `events` sender/receiver pair.
    ///
    /// The dispatcher's channel is built by the caller first (via
    /// [`Dispatcher::new`]), *then* `events` is cloned into whatever
    /// concrete `hal`/`data_path_manager` the caller constructs — that's
    /// how those collaborators get the non-owning back-channel capability
    /// to push [`crate::event::Event::Response`]/[`crate::event::Event::Notification`]
    /// onto the dispatcher (spec §4.7, §9 "cyclic reference" design note).
    /// `NanStateManager` itself never constructs its own channel, so it
    /// can't hand out a sender nobody asked for.
    pub fn new(
        config: &Config,
        events: EventSender,
        hal: Box<dyn HalAdapter>,
        data_path_manager: Box<dyn DataPathManager>,
    ) -> (Self, NanHandle) {
        let usage_enabled = Arc::new(AtomicBool::new(false));
        let (usage_broadcast, _rx) = broadcast::channel(16);

        let manager = Self {
            registry: ClientRegistry::new(),
            gate: CommandGate::new(),
            send_queue: SendQueue::with_timeout(config.send_message_timeout()),
            send_message_timer: None,
            datapath_timers: DataPathConfirmTimers::new(),
            tx_alloc: TransactionIdAllocator::new(),
            session_id_alloc: SessionIdAllocator::new(),
            current_nan_configuration: None,
            current_discovery_interface_mac: MacAddr::ZERO,
            usage_enabled: usage_enabled.clone(),
            capabilities_cache: None,
            hal,
            data_path_manager,
            events: events.clone(),
            usage_broadcast,
            response_timeout: config.response_timeout(),
            data_path_confirm_timeout: config.data_path_confirm_timeout(),
        };
        let handle = NanHandle { events, usage_enabled };
        (manager, handle)
    }

    pub fn subscribe_usage_state(&self) -> broadcast::Receiver<UsageStateChanged> {
        self.usage_broadcast.subscribe()
    }

    // ---- command admission -------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match self.gate.admit_command(command) {
            CommandAdmit::Deferred => {}
            CommandAdmit::Process(command) => self.process_command(command),
        }
    }

    fn process_command(&mut self, command: Command) {
        match command {
            Command::Connect { .. } => self.do_connect(command),
            Command::Disconnect { client_id } => self.do_disconnect(client_id),
            Command::Publish { .. } => self.do_publish_or_subscribe(command, SessionKind::Publish),
            Command::Subscribe { .. } => self.do_publish_or_subscribe(command, SessionKind::Subscribe),
            Command::UpdatePublish { .. } | Command::UpdateSubscribe { .. } => self.do_update_session(command),
            Command::TerminateSession { client_id, session_id } => self.do_terminate_session(client_id, session_id),
            Command::SendMessage { .. } => self.do_enqueue_send_message(command),
            Command::StartRanging { client_id, session_id, peer_id } => {
                debug!(
                    client_id = client_id.0,
                    session_id = session_id.0,
                    peer_id = peer_id.0,
                    "start_ranging: forwarding to the ranging subsystem (out of scope)"
                );
            }
            Command::EnableUsage => self.do_set_usage(true),
            Command::DisableUsage => self.do_set_usage(false),
            Command::GetCapabilities { .. } => self.do_get_capabilities(command),
            Command::CreateAllDataPathInterfaces => self.data_path_manager.create_all_data_path_interfaces(),
            Command::DeleteAllDataPathInterfaces => self.data_path_manager.delete_all_data_path_interfaces(),
            Command::CreateDataPathInterface { .. } => self.begin_round_trip(command, |tx, command| match command {
                Command::CreateDataPathInterface { name } => HalCall::CreateInterface { tx, name },
                _ => unreachable!(),
            }),
            Command::DeleteDataPathInterface { .. } => self.begin_round_trip(command, |tx, command| match command {
                Command::DeleteDataPathInterface { name } => HalCall::DeleteInterface { tx, name },
                _ => unreachable!(),
            }),
            Command::InitiateDataPathSetup { .. } => self.begin_round_trip(command, |tx, command| match command {
                Command::InitiateDataPathSetup { network_specifier, peer_mac } => {
                    HalCall::InitiateDataPath { tx, network_specifier, peer_mac }
                }
                _ => unreachable!(),
            }),
            Command::RespondToDataPathRequest { .. } => self.begin_round_trip(command, |tx, command| match command {
                Command::RespondToDataPathRequest { network_specifier, ndp_id, accept } => {
                    HalCall::RespondToDataPath { tx, accept, ndp_id, network_specifier }
                }
                _ => unreachable!(),
            }),
            Command::EndDataPath { .. } => self.begin_round_trip(command, |tx, command| match command {
                Command::EndDataPath { ndp_id } => HalCall::EndDataPath { tx, ndp_id },
                _ => unreachable!(),
            }),
            Command::TransmitNextMessage => self.do_transmit_next_message(),
        }
    }

    /// Allocate a transaction id, build the HAL call from `command`, submit
    /// it, and enter `WaitForResponse`. On submission failure, synthesize
    /// the failure response immediately instead (spec §4.7) and leave the
    /// gate in `Wait`.
    fn begin_round_trip(&mut self, command: Command, build_call: impl FnOnce(TransactionId, &Command) -> HalCall) {
        let tx = self.tx_alloc.allocate();
        let call = build_call(tx, &command);
        if let Err(err) = self.hal.submit(call) {
            warn!(%err, ?tx, "hal submission failed, synthesizing failure response");
            if let Some(response) = fsm::synthesize_failure(&command, tx, ReasonCode::Error) {
                self.apply_response(response, command);
            }
            return;
        }
        dispatcher::spawn_timeout(self.response_timeout, self.events.clone(), TimeoutEvent::CommandResponse { tx });
        self.gate.enter_wait_for_response(tx, command);
    }

    // ---- connect / disconnect ------------------------------------------

    fn do_connect(&mut self, command: Command) {
        let Command::Connect { client_id, uid, pid, calling_package, config, notify_identity_change, callbacks } =
            command
        else {
            unreachable!("do_connect only ever receives Command::Connect");
        };

        if !self.usage_enabled.load(Ordering::Relaxed) {
            callbacks.on_connect_fail(ReasonCode::UsageDisabled);
            return;
        }

        if self.registry.contains(client_id) {
            warn!(client_id = client_id.0, "connect: duplicate client_id, proceeding anyway");
        }

        let Some(merged) = nan_config::merge(Some(&config), self.registry.config_requests()) else {
            warn!(client_id = client_id.0, "connect: config merge produced no configuration");
            callbacks.on_connect_fail(ReasonCode::Error);
            return;
        };

        if let Some(current) = self.current_nan_configuration {
            // Reproduced verbatim from the source (spec §9 open question,
            // see DESIGN.md): this check compares the raw per-client
            // request against the current configuration rather than
            // against `merged`, so a request that would in fact merge
            // compatibly can still be rejected here.
            if config != current && merged != current && configs_incompatible(&config, &current) {
                callbacks.on_connect_fail(ReasonCode::Error);
                return;
            }
        }

        if Some(merged) == self.current_nan_configuration {
            callbacks.on_connect_success();
            callbacks.on_interface_address_change(self.current_discovery_interface_mac);
            self.registry.insert(ClientState::new(
                client_id,
                uid,
                pid,
                calling_package,
                Some(config),
                notify_identity_change,
                callbacks,
            ));
            return;
        }

        let initial = self.current_nan_configuration.is_none();
        self.begin_round_trip(
            Command::Connect { client_id, uid, pid, calling_package, config, notify_identity_change, callbacks },
            move |tx, _| HalCall::EnableAndConfigure { tx, config: merged, initial },
        );
    }

    fn do_disconnect(&mut self, client_id: ClientId) {
        let Some(removed) = self.registry.remove(client_id) else {
            warn!(client_id = client_id.0, "disconnect: unknown client_id");
            return;
        };
        drop(removed); // tears down its sessions, no callback owed for a caller-initiated disconnect

        if self.registry.is_empty() {
            self.begin_round_trip(Command::Disconnect { client_id }, |tx, _| HalCall::Disable { tx });
        } else {
            let merged = nan_config::merge(None, self.registry.config_requests());
            if merged == self.current_nan_configuration {
                return;
            }
            let Some(merged) = merged else {
                warn!(client_id = client_id.0, "disconnect: config merge produced no configuration for a non-empty registry");
                return;
            };
            self.begin_round_trip(Command::Disconnect { client_id }, move |tx, _| HalCall::EnableAndConfigure {
                tx,
                config: merged,
                initial: false,
            });
        }
    }

    // ---- publish / subscribe / update ----------------------------------

    fn do_publish_or_subscribe(&mut self, command: Command, kind: SessionKind) {
        let (client_id, config, callbacks) = match command {
            Command::Publish { client_id, config, callbacks } => (client_id, config, callbacks),
            Command::Subscribe { client_id, config, callbacks } => (client_id, config, callbacks),
            _ => unreachable!("do_publish_or_subscribe only receives Publish/Subscribe"),
        };
        if !self.registry.contains(client_id) {
            warn!(client_id = client_id.0, "publish/subscribe: unknown client_id");
            callbacks.on_session_config_fail(ReasonCode::UnknownId);
            return;
        }
        let rebuilt = match kind {
            SessionKind::Publish => Command::Publish { client_id, config, callbacks },
            SessionKind::Subscribe => Command::Subscribe { client_id, config, callbacks },
        };
        self.begin_round_trip(rebuilt, move |tx, command| {
            let config = match command {
                Command::Publish { config, .. } | Command::Subscribe { config, .. } => *config,
                _ => unreachable!(),
            };
            match kind {
                SessionKind::Publish => HalCall::Publish { tx, pub_sub_id: PubSubId(0), config },
                SessionKind::Subscribe => HalCall::Subscribe { tx, pub_sub_id: PubSubId(0), config },
            }
        });
    }

    fn do_update_session(&mut self, command: Command) {
        let (client_id, session_id, config, is_publish) = match &command {
            Command::UpdatePublish { client_id, session_id, config } => (*client_id, *session_id, *config, true),
            Command::UpdateSubscribe { client_id, session_id, config } => (*client_id, *session_id, *config, false),
            _ => unreachable!("do_update_session only receives UpdatePublish/UpdateSubscribe"),
        };
        let Some(pub_sub_id) =
            self.registry.get(client_id).and_then(|c| c.session(session_id)).map(|s| s.pub_sub_id)
        else {
            warn!(client_id = client_id.0, session_id = session_id.0, "update session: unknown client/session");
            return;
        };
        self.begin_round_trip(command, move |tx, _| {
            if is_publish {
                HalCall::Publish { tx, pub_sub_id, config }
            } else {
                HalCall::Subscribe { tx, pub_sub_id, config }
            }
        });
    }

    fn do_terminate_session(&mut self, client_id: ClientId, session_id: SessionId) {
        let Some(client) = self.registry.get_mut(client_id) else {
            warn!(client_id = client_id.0, "terminate_session: unknown client_id");
            return;
        };
        let Some(session) = client.remove_session(session_id) else {
            warn!(client_id = client_id.0, session_id = session_id.0, "terminate_session: unknown session_id");
            return;
        };
        // Fire-and-forget (spec §4.3): no transaction tracked, no response awaited.
        if let Err(err) = self.hal.submit(HalCall::CancelSession { pub_sub_id: session.pub_sub_id }) {
            warn!(%err, pub_sub_id = session.pub_sub_id.0, "terminate_session: hal cancel submission failed");
        }
    }

    // ---- send-message subsystem -----------------------------------------

    fn do_enqueue_send_message(&mut self, command: Command) {
        let Command::SendMessage { client_id, session_id, peer_id, message_id, payload, retry_count } = command
        else {
            unreachable!("do_enqueue_send_message only receives Command::SendMessage");
        };
        let (_, should_kick) =
            self.send_queue.enqueue(client_id, session_id, peer_id, payload, message_id, retry_count);
        if should_kick {
            self.events.send_command(Command::TransmitNextMessage);
        }
    }

    fn do_transmit_next_message(&mut self) {
        if !self.send_queue.should_transmit() {
            return;
        }
        let tx = self.tx_alloc.allocate();
        let Some(message) = self.send_queue.transmit_next(tx) else {
            return;
        };
        let call = HalCall::SendFollowonMessage {
            tx,
            session_id: message.session_id,
            peer_id: message.peer_id,
            payload: message.payload.clone(),
            message_id: message.message_id.0,
        };
        if let Err(err) = self.hal.submit(call) {
            warn!(%err, ?tx, "send-message submission failed, treating as queue-full");
            self.send_queue.handle_queued_fail(tx);
            return;
        }
        dispatcher::spawn_timeout(self.response_timeout, self.events.clone(), TimeoutEvent::CommandResponse { tx });
        self.gate.enter_wait_for_response(tx, Command::TransmitNextMessage);
    }

    /// (Re-)arm the single send-message wake-timer (spec §4.4): cancels
    /// whatever timer was previously armed — unconditionally, even when
    /// `deadline` is `None` — then spawns a fresh cancellable one if a
    /// deadline was given. Without this, a superseded timer that still
    /// fires would force-expire the firmware queue's new first entry even
    /// though it isn't the message the timer was originally armed for.
    fn arm_send_message_timeout(&mut self, deadline: Option<Instant>) {
        if let Some(previous) = self.send_message_timer.take() {
            previous.cancel();
        }
        let Some(deadline) = deadline else { return };
        let delay = deadline.saturating_duration_since(Instant::now());
        let token = CancellationToken::new();
        self.send_message_timer = Some(token.clone());
        dispatcher::spawn_cancellable_timeout(
            delay,
            self.events.clone(),
            TimeoutEvent::SendMessage { tx: TransactionId::NONE },
            token,
        );
    }

    /// Deliver a send-message outcome to the owning session's callback.
    /// Missing means the client or session disconnected mid-flight; nothing
    /// to deliver to.
    fn deliver_send_outcome(&mut self, outcome: Option<SendOutcome>) {
        let Some(outcome) = outcome else { return };
        match outcome {
            SendOutcome::Success { client_id, session_id, message_id } => {
                if let Some(session) = self.registry.get_mut(client_id).and_then(|c| c.session_mut(session_id)) {
                    session.callbacks.on_message_send_success(message_id);
                } else {
                    warn!(client_id = client_id.0, session_id = session_id.0, "message send success: session gone");
                }
            }
            SendOutcome::Failed { client_id, session_id, message_id, reason } => {
                if let Some(session) = self.registry.get_mut(client_id).and_then(|c| c.session_mut(session_id)) {
                    session.callbacks.on_message_send_fail(message_id, reason);
                } else {
                    warn!(client_id = client_id.0, session_id = session_id.0, "message send fail: session gone");
                }
            }
            SendOutcome::Retried => {}
        }
    }

    // ---- usage flag -------------------------------------------------------

    fn do_set_usage(&mut self, enabled: bool) {
        self.usage_enabled.store(enabled, Ordering::Relaxed);
        let _ = self.usage_broadcast.send(UsageStateChanged { enabled });
    }

    // ---- capabilities -----------------------------------------------------

    fn do_get_capabilities(&mut self, command: Command) {
        let Command::GetCapabilities { client_id, respond } = command else {
            unreachable!("do_get_capabilities only receives Command::GetCapabilities");
        };
        if let Some(caps) = self.capabilities_cache.clone() {
            let _ = respond.send(caps);
            return;
        }
        self.begin_round_trip(Command::GetCapabilities { client_id, respond }, |tx, _| {
            HalCall::GetCapabilities { tx }
        });
    }

    // ---- HAL responses ------------------------------------------------

    fn handle_response(&mut self, response: HalResponse) {
        match self.gate.admit_response(response) {
            ResponseAdmit::Process { response, original } => self.apply_response(response, original),
            ResponseAdmit::Deferred | ResponseAdmit::Stale => {}
        }
    }

    fn handle_timeout_response(&mut self, tx: TransactionId) {
        match self.gate.admit_response_timeout(tx) {
            TimeoutAdmit::Process { response: Some(response), original } => self.apply_response(response, original),
            TimeoutAdmit::Process { response: None, original } => drop(original),
            TimeoutAdmit::Stale => {}
        }
    }

    fn apply_response(&mut self, response: HalResponse, original: Command) {
        match (response, original) {
            (HalResponse::ConfigSuccess { .. }, Command::Connect { client_id, uid, pid, calling_package, config, notify_identity_change, callbacks }) => {
                let Some(merged) = nan_config::merge(Some(&config), self.registry.config_requests()) else {
                    warn!(client_id = client_id.0, "connect config-success: merge produced no configuration");
                    callbacks.on_connect_fail(ReasonCode::Error);
                    return;
                };
                self.current_nan_configuration = Some(merged);
                callbacks.on_connect_success();
                callbacks.on_interface_address_change(self.current_discovery_interface_mac);
                self.registry.insert(ClientState::new(
                    client_id,
                    uid,
                    pid,
                    calling_package,
                    Some(config),
                    notify_identity_change,
                    callbacks,
                ));
            }
            (HalResponse::ConfigFail { reason, .. }, Command::Connect { callbacks, .. }) => {
                callbacks.on_connect_fail(reason);
            }
            (HalResponse::ConfigSuccess { .. }, Command::Disconnect { .. }) => {
                self.current_nan_configuration = nan_config::merge(None, self.registry.config_requests());
            }
            (HalResponse::ConfigFail { reason, .. }, Command::Disconnect { client_id }) => {
                warn!(client_id = client_id.0, %reason, "disconnect reconfiguration failed");
            }
            (
                HalResponse::SessionConfigSuccess { pub_sub_id, .. },
                Command::Publish { client_id, callbacks, .. },
            ) => self.finish_session_started(client_id, pub_sub_id, SessionKind::Publish, callbacks),
            (
                HalResponse::SessionConfigSuccess { pub_sub_id, .. },
                Command::Subscribe { client_id, callbacks, .. },
            ) => self.finish_session_started(client_id, pub_sub_id, SessionKind::Subscribe, callbacks),
            (HalResponse::SessionConfigFail { reason, .. }, Command::Publish { callbacks, .. })
            | (HalResponse::SessionConfigFail { reason, .. }, Command::Subscribe { callbacks, .. }) => {
                callbacks.on_session_config_fail(reason);
            }
            (
                HalResponse::SessionConfigSuccess { pub_sub_id, .. },
                Command::UpdatePublish { client_id, session_id, .. },
            )
            | (
                HalResponse::SessionConfigSuccess { pub_sub_id, .. },
                Command::UpdateSubscribe { client_id, session_id, .. },
            ) => {
                if let Some(session) = self.registry.get_mut(client_id).and_then(|c| c.session_mut(session_id)) {
                    session.on_session_config_success(pub_sub_id);
                } else {
                    warn!(client_id = client_id.0, session_id = session_id.0, "update session success: session gone");
                }
            }
            (
                HalResponse::SessionConfigFail { reason, .. },
                Command::UpdatePublish { client_id, session_id, .. },
            )
            | (
                HalResponse::SessionConfigFail { reason, .. },
                Command::UpdateSubscribe { client_id, session_id, .. },
            ) => {
                if let Some(session) = self.registry.get_mut(client_id).and_then(|c| c.session_mut(session_id)) {
                    session.on_session_config_fail(reason);
                } else {
                    warn!(client_id = client_id.0, session_id = session_id.0, "update session fail: session gone");
                }
            }
            (HalResponse::MessageSendQueuedSuccess { tx }, Command::TransmitNextMessage) => {
                let deadline = self.send_queue.handle_queued_success(tx, Instant::now());
                self.arm_send_message_timeout(deadline);
                self.events.send_command(Command::TransmitNextMessage);
            }
            (HalResponse::MessageSendQueuedFail { tx, .. }, Command::TransmitNextMessage) => {
                self.send_queue.handle_queued_fail(tx);
            }
            (HalResponse::CapabilitiesUpdated { caps, .. }, Command::GetCapabilities { respond, .. }) => {
                self.capabilities_cache = Some(caps.clone());
                let _ = respond.send(caps);
            }
            (HalResponse::CreateInterfaceResp { ok, reason, .. }, Command::CreateDataPathInterface { name }) => {
                debug!(name, ok, ?reason, "create_data_path_interface completed");
            }
            (HalResponse::DeleteInterfaceResp { ok, reason, .. }, Command::DeleteDataPathInterface { name }) => {
                debug!(name, ok, ?reason, "delete_data_path_interface completed");
            }
            (
                HalResponse::InitiateDataPathSuccess { .. },
                Command::InitiateDataPathSetup { network_specifier, .. },
            ) => self.arm_data_path_confirm_timer(network_specifier),
            (
                HalResponse::InitiateDataPathFail { reason, .. },
                Command::InitiateDataPathSetup { network_specifier, .. },
            ) => {
                debug!(network_specifier, %reason, "initiate_data_path_setup failed");
            }
            (
                HalResponse::RespondToDataPathSetupResp { ok: true, .. },
                Command::RespondToDataPathRequest { network_specifier, accept: true, .. },
            ) => self.arm_data_path_confirm_timer(network_specifier),
            (HalResponse::RespondToDataPathSetupResp { ok, reason, .. }, Command::RespondToDataPathRequest { .. }) => {
                debug!(ok, ?reason, "respond_to_data_path_request completed");
            }
            (HalResponse::EndDataPathResp { ok, reason, .. }, Command::EndDataPath { ndp_id }) => {
                debug!(ndp_id, ok, ?reason, "end_data_path completed");
            }
            (response, original) => {
                warn!(?response, "response did not match the shape of its own in-flight command");
                drop(original);
            }
        }
    }

    fn finish_session_started(
        &mut self,
        client_id: ClientId,
        pub_sub_id: PubSubId,
        kind: SessionKind,
        callbacks: Box<dyn SessionCallbacks>,
    ) {
        let Some(client) = self.registry.get_mut(client_id) else {
            warn!(client_id = client_id.0, "session started for a client that disconnected mid-flight");
            return;
        };
        let session_id = self.session_id_alloc.allocate();
        callbacks.on_session_started(session_id);
        callbacks.on_session_config_success(pub_sub_id);
        client.insert_session(SessionState::new(session_id, pub_sub_id, kind, callbacks));
    }

    fn arm_data_path_confirm_timer(&mut self, network_specifier: String) {
        let token = self.datapath_timers.register(network_specifier.clone());
        dispatcher::spawn_cancellable_timeout(
            self.data_path_confirm_timeout,
            self.events.clone(),
            TimeoutEvent::DataPathConfirm { network_specifier },
            token,
        );
    }

    // ---- HAL notifications ---------------------------------------------

    fn handle_notification(&mut self, notification: HalNotification) {
        match notification {
            HalNotification::InterfaceAddressChange { mac } => {
                self.current_discovery_interface_mac = mac;
                for client in self.registry_clients_mut() {
                    client.callbacks.on_interface_address_change(mac);
                }
            }
            HalNotification::ClusterChange { started, cluster_id } => {
                for client in self.registry_clients_mut() {
                    client.callbacks.on_cluster_change(started, cluster_id);
                }
            }
            HalNotification::Match { pub_sub_id, peer_id, peer_mac, ssi, filter } => {
                if let Some((_, _, session)) = self.registry.find_by_pub_sub_id_mut(pub_sub_id) {
                    session.record_peer(peer_id, peer_mac);
                    session.callbacks.on_match(peer_id, peer_mac, ssi, filter);
                } else {
                    warn!(pub_sub_id = pub_sub_id.0, "match notification for unknown session");
                }
            }
            HalNotification::SessionTerminated { pub_sub_id, reason } => {
                if let Some((client_id, session_id, _)) = self.registry.find_by_pub_sub_id(pub_sub_id) {
                    if let Some(session) =
                        self.registry.get_mut(client_id).and_then(|c| c.remove_session(session_id))
                    {
                        session.callbacks.on_session_terminated(reason);
                    }
                } else {
                    warn!(pub_sub_id = pub_sub_id.0, "session-terminated for unknown session");
                }
            }
            HalNotification::MessageReceived { pub_sub_id, peer_id, peer_mac, payload } => {
                if let Some((_, _, session)) = self.registry.find_by_pub_sub_id_mut(pub_sub_id) {
                    session.callbacks.on_message_received(peer_id, peer_mac, payload);
                } else {
                    warn!(pub_sub_id = pub_sub_id.0, "message received for unknown session");
                }
            }
            HalNotification::NanDown { reason } => self.handle_nan_down(reason),
            HalNotification::MessageSendSuccess { tx } => {
                let (outcome, deadline) = self.send_queue.handle_send_success(tx, Instant::now());
                self.arm_send_message_timeout(deadline);
                self.deliver_send_outcome(outcome);
                self.events.send_command(Command::TransmitNextMessage);
            }
            HalNotification::MessageSendFail { tx, reason } => {
                let (outcome, deadline) = self.send_queue.handle_send_fail(tx, reason, Instant::now());
                self.arm_send_message_timeout(deadline);
                self.deliver_send_outcome(outcome);
                self.events.send_command(Command::TransmitNextMessage);
            }
            HalNotification::DataPathRequest { pub_sub_id, peer_mac, ndp_id, app_info } => {
                self.data_path_manager.handle_data_path_request(pub_sub_id, peer_mac, ndp_id, app_info);
            }
            HalNotification::DataPathConfirm { ndp_id, peer_mac, accept, reason, app_info, network_specifier } => {
                self.datapath_timers.confirm(&network_specifier);
                self.data_path_manager.handle_data_path_confirm(ndp_id, peer_mac, accept, reason, app_info);
            }
            HalNotification::DataPathEnd { ndp_id } => self.data_path_manager.handle_data_path_end(ndp_id),
        }
    }

    fn registry_clients_mut(&mut self) -> impl Iterator<Item = &mut ClientState> {
        self.registry.clients_mut()
    }

    fn handle_nan_down(&mut self, reason: ReasonCode) {
        debug!(%reason, "on_nan_down: purging all state");
        for client in self.registry.clear() {
            for session in client.into_sessions() {
                session.callbacks.on_session_terminated(reason);
            }
        }
        self.current_nan_configuration = None;
        self.current_discovery_interface_mac = MacAddr::ZERO;
        self.send_queue.clear();
        if let Some(timer) = self.send_message_timer.take() {
            timer.cancel();
        }
        self.datapath_timers.clear();
        self.gate = CommandGate::new();
        self.data_path_manager.handle_nan_down();
    }
}

/// Reproduces the source's over-rejection bug (spec §9 open question): a
/// requested config is deemed "incompatible" with the current one only
/// when both carry an explicit cluster-range constraint and those ranges
/// don't overlap — a narrower, more defensible policy than the source ever
/// states precisely, but the comparison against the raw request instead of
/// the merge is kept (see callers and DESIGN.md).
fn configs_incompatible(requested: &ConfigRequest, current: &ConfigRequest) -> bool {
    let req_constrained = requested.cluster_low != 0 || requested.cluster_high != nan_config::CLUSTER_ID_MAX;
    let cur_constrained = current.cluster_low != 0 || current.cluster_high != nan_config::CLUSTER_ID_MAX;
    if !req_constrained || !cur_constrained {
        return false;
    }
    requested.cluster_high < current.cluster_low || current.cluster_high < requested.cluster_low
}

impl EventSink for NanStateManager {
    fn pop_deferred(&mut self) -> Option<Event> {
        self.gate.pop_deferred()
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Response(response) => self.handle_response(response),
            Event::Notification(notification) => self.handle_notification(notification),
            Event::Timeout(TimeoutEvent::CommandResponse { tx }) => self.handle_timeout_response(tx),
            Event::Timeout(TimeoutEvent::SendMessage { .. }) => {
                let expired = self.send_queue.expire_on_timeout(Instant::now());
                for message in expired {
                    if let Some(session) =
                        self.registry.get_mut(message.client_id).and_then(|c| c.session_mut(message.session_id))
                    {
                        session.callbacks.on_message_send_fail(message.message_id, ReasonCode::Timeout);
                    }
                }
                let deadline = self.send_queue.next_timeout_deadline();
                self.arm_send_message_timeout(deadline);
                self.events.send_command(Command::TransmitNextMessage);
            }
            Event::Timeout(TimeoutEvent::DataPathConfirm { network_specifier }) => {
                if self.datapath_timers.expire(&network_specifier) {
                    self.data_path_manager.handle_data_path_timeout(&network_specifier);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
