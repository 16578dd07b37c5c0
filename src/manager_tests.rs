// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests driven directly through [`EventSink::handle`], bypassing
//! [`crate::dispatcher::Dispatcher`] entirely — these tests know the exact
//! sequence of self-posted `Command::TransmitNextMessage` events the manager
//! would emit onto the dispatcher's channel and issue them by hand instead
//! of draining a channel nothing else is feeding. Transaction ids are
//! likewise predictable: one per `Command::Connect`/`Publish`/`Subscribe`
//! that requires a HAL round trip, allocated in call order starting at 1.

use std::sync::Arc;

use clap::Parser;

use super::*;
use crate::config::Config;
use crate::dispatcher;
use crate::fsm::GateState;
use crate::test_support::{Recorder, RecordingClientCallbacks, RecordingDataPathManager, RecordingHal, RecordingSessionCallbacks};

fn test_config() -> Config {
    Config::parse_from([
        "nan-cored",
        "--response-timeout-ms",
        "20",
        "--send-message-timeout-ms",
        "30",
        "--data-path-confirm-timeout-ms",
        "20",
    ])
}

fn new_manager(recorder: &Arc<Recorder>) -> (NanStateManager, NanHandle) {
    let (_dispatcher, events) = dispatcher::Dispatcher::new(64, CancellationToken::new());
    let hal = RecordingHal { recorder: recorder.clone() };
    let data_path_manager = RecordingDataPathManager { recorder: recorder.clone() };
    NanStateManager::new(&test_config(), events, Box::new(hal), Box::new(data_path_manager))
}

fn client_callbacks(recorder: &Arc<Recorder>, client_id: i32) -> Box<dyn ClientCallbacks> {
    Box::new(RecordingClientCallbacks { recorder: recorder.clone(), client_id })
}

fn session_callbacks(recorder: &Arc<Recorder>, label: &str) -> Box<dyn SessionCallbacks> {
    Box::new(RecordingSessionCallbacks { recorder: recorder.clone(), label: label.to_owned() })
}

fn connect_cmd(recorder: &Arc<Recorder>, client_id: i32) -> Command {
    Command::Connect {
        client_id: ClientId(client_id),
        uid: 1000,
        pid: 1234,
        calling_package: "com.example.app".to_owned(),
        config: ConfigRequest::unconstrained(),
        notify_identity_change: false,
        callbacks: client_callbacks(recorder, client_id),
    }
}

fn publish_cmd(recorder: &Arc<Recorder>, client_id: i32, label: &str) -> Command {
    Command::Publish {
        client_id: ClientId(client_id),
        config: ConfigRequest::unconstrained(),
        callbacks: session_callbacks(recorder, label),
    }
}

fn subscribe_cmd(recorder: &Arc<Recorder>, client_id: i32, label: &str) -> Command {
    Command::Subscribe {
        client_id: ClientId(client_id),
        config: ConfigRequest::unconstrained(),
        callbacks: session_callbacks(recorder, label),
    }
}

/// Scenario S1: a single publish round trip, in order, with the state it
/// leaves behind.
#[tokio::test]
async fn scenario_s1_single_publish_round_trip() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 7)));
    assert_eq!(manager.gate.state(), GateState::WaitForResponse);
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    assert_eq!(manager.gate.state(), GateState::Wait);
    assert!(recorder.snapshot().contains(&"client[7].on_connect_success".to_owned()));

    manager.handle(Event::Command(publish_cmd(&recorder, 7, "s7")));
    assert_eq!(manager.gate.state(), GateState::WaitForResponse);
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(2),
        is_publish: true,
        pub_sub_id: PubSubId(42),
    }));
    assert_eq!(manager.gate.state(), GateState::Wait);

    let calls = recorder.snapshot();
    let started = calls.iter().position(|c| c == "s7.on_session_started(1)").expect("session started");
    let config_ok =
        calls.iter().position(|c| c == "s7.on_session_config_success(42)").expect("session config success");
    assert!(started < config_ok, "on_session_started must fire before on_session_config_success");

    let client = manager.registry.get(ClientId(7)).expect("client registered");
    let session = client.session(SessionId(1)).expect("session registered");
    assert_eq!(session.pub_sub_id, PubSubId(42));
}

/// Scenario S2: a retryable send failure is retried transparently and ends
/// with exactly one success callback.
#[tokio::test]
async fn scenario_s2_send_with_retry_ends_with_exactly_one_success() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    manager.handle(Event::Command(publish_cmd(&recorder, 1, "s1")));
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(2),
        is_publish: true,
        pub_sub_id: PubSubId(9),
    }));

    manager.handle(Event::Command(Command::SendMessage {
        client_id: ClientId(1),
        session_id: SessionId(1),
        peer_id: PeerInstanceId(3),
        message_id: MessageId(77),
        payload: bytes::Bytes::from_static(b"hi"),
        retry_count: 1,
    }));

    manager.handle(Event::Command(Command::TransmitNextMessage));
    assert_eq!(manager.gate.state(), GateState::WaitForResponse);
    let tx1 = TransactionId(3);
    manager.handle(Event::Response(HalResponse::MessageSendQueuedSuccess { tx: tx1 }));
    assert_eq!(manager.send_queue.firmware_len(), 1);

    manager.handle(Event::Notification(HalNotification::MessageSendFail { tx: tx1, reason: ReasonCode::NoOtaAck }));
    assert_eq!(manager.send_queue.host_len(), 1, "retried message goes back to the host queue");
    assert!(recorder.count_matching("on_message_send_fail") == 0, "a retry must not surface a failure callback");

    manager.handle(Event::Command(Command::TransmitNextMessage));
    let tx2 = TransactionId(4);
    manager.handle(Event::Response(HalResponse::MessageSendQueuedSuccess { tx: tx2 }));
    manager.handle(Event::Notification(HalNotification::MessageSendSuccess { tx: tx2 }));

    assert_eq!(recorder.count_matching("on_message_send_success(77)"), 1);
    assert_eq!(recorder.count_matching("on_message_send_fail"), 0);
    assert!(manager.send_queue.is_empty());
}

/// Scenario S3: a firmware-queue-full rejection blocks the send queue until
/// the earlier in-flight message's completion notification arrives, and FIFO
/// order is preserved across the block.
#[tokio::test]
async fn scenario_s3_firmware_queue_blocks_until_next_send_completion() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    manager.handle(Event::Command(publish_cmd(&recorder, 1, "s1")));
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(2),
        is_publish: true,
        pub_sub_id: PubSubId(5),
    }));

    for (message_id, payload) in [(1, "a"), (2, "b"), (3, "c")] {
        manager.handle(Event::Command(Command::SendMessage {
            client_id: ClientId(1),
            session_id: SessionId(1),
            peer_id: PeerInstanceId(1),
            message_id: MessageId(message_id),
            payload: bytes::Bytes::from_static(payload.as_bytes()),
            retry_count: 0,
        }));
    }

    manager.handle(Event::Command(Command::TransmitNextMessage));
    let tx1 = TransactionId(3);
    manager.handle(Event::Response(HalResponse::MessageSendQueuedSuccess { tx: tx1 }));

    manager.handle(Event::Command(Command::TransmitNextMessage));
    let tx2 = TransactionId(4);
    manager.handle(Event::Response(HalResponse::MessageSendQueuedFail { tx: tx2, reason: ReasonCode::QueueFull }));
    assert!(manager.send_queue.is_blocked());
    assert!(!manager.send_queue.should_transmit());

    manager.handle(Event::Notification(HalNotification::MessageSendSuccess { tx: tx1 }));
    assert_eq!(recorder.count_matching("on_message_send_success(1)"), 1);
    assert!(!manager.send_queue.is_blocked());
    assert!(manager.send_queue.should_transmit());

    manager.handle(Event::Command(Command::TransmitNextMessage));
    let tx3 = TransactionId(5);
    manager.handle(Event::Response(HalResponse::MessageSendQueuedSuccess { tx: tx3 }));
    manager.handle(Event::Notification(HalNotification::MessageSendSuccess { tx: tx3 }));

    assert_eq!(recorder.count_matching("on_message_send_success(2)"), 1);
    assert_eq!(manager.send_queue.host_len(), 1, "message 3 is still waiting its turn");
}

/// Scenario S4: a command response that never arrives is synthesized as a
/// failure by the response timeout, and the gate reopens.
#[tokio::test]
async fn scenario_s4_command_response_timeout_synthesizes_failure() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    assert_eq!(manager.gate.state(), GateState::WaitForResponse);

    manager.handle(Event::Timeout(TimeoutEvent::CommandResponse { tx: TransactionId(1) }));

    assert_eq!(recorder.snapshot(), vec!["client[1].on_connect_fail(TIMEOUT)".to_owned()]);
    assert_eq!(manager.gate.state(), GateState::Wait);
    assert!(!manager.registry.contains(ClientId(1)));
}

/// Scenario S6: `on_nan_down` purges every piece of state the manager owns
/// and notifies every live session/data-path collaborator.
#[tokio::test]
async fn scenario_s6_nan_down_purges_all_state() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    manager.handle(Event::Command(publish_cmd(&recorder, 1, "s1")));
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(2),
        is_publish: true,
        pub_sub_id: PubSubId(5),
    }));
    manager.handle(Event::Command(Command::SendMessage {
        client_id: ClientId(1),
        session_id: SessionId(1),
        peer_id: PeerInstanceId(1),
        message_id: MessageId(1),
        payload: bytes::Bytes::from_static(b"x"),
        retry_count: 0,
    }));
    manager.handle(Event::Command(Command::TransmitNextMessage));
    manager.handle(Event::Response(HalResponse::MessageSendQueuedSuccess { tx: TransactionId(3) }));

    assert!(!manager.send_queue.is_empty());
    assert!(manager.registry.contains(ClientId(1)));
    assert!(manager.current_nan_configuration.is_some());

    manager.handle(Event::Notification(HalNotification::NanDown { reason: ReasonCode::Error }));

    assert!(manager.registry.is_empty());
    assert!(manager.send_queue.is_empty());
    assert!(manager.current_nan_configuration.is_none());
    assert_eq!(manager.current_discovery_interface_mac, MacAddr::ZERO);
    assert_eq!(manager.gate.state(), GateState::Wait);
    assert_eq!(recorder.count_matching("s1.on_session_terminated(ERROR)"), 1);
    assert_eq!(recorder.count_matching("datapath.nan_down"), 1);
}

/// Invariant: at most one HAL command is ever in flight. A second command
/// arriving while the gate is busy is deferred, not dropped, and is
/// processed once the in-flight one resolves.
#[tokio::test]
async fn second_command_while_gate_busy_is_deferred_then_replayed() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    assert_eq!(manager.gate.state(), GateState::WaitForResponse);

    manager.handle(Event::Command(connect_cmd(&recorder, 2)));
    assert!(recorder.snapshot().iter().all(|c| !c.contains("client[2]")), "deferred command must not run yet");

    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    assert_eq!(manager.gate.state(), GateState::Wait);

    let deferred = manager.pop_deferred().expect("client 2's connect was deferred");
    manager.handle(deferred);
    assert_eq!(manager.gate.state(), GateState::WaitForResponse);
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(2) }));

    assert!(recorder.snapshot().iter().any(|c| c == "client[2].on_connect_success"));
}

/// A connect request whose merged configuration already matches the active
/// one connects without a second HAL round trip at all.
#[tokio::test]
async fn connect_with_already_active_config_skips_the_round_trip() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));

    manager.handle(Event::Command(connect_cmd(&recorder, 2)));
    assert_eq!(manager.gate.state(), GateState::Wait, "no round trip should have been started");
    assert_eq!(recorder.count_matching("client[2].on_connect_success"), 1);
    assert!(manager.registry.contains(ClientId(2)));
}

/// Interface address changes fan out to every connected client, and a
/// subsequent `Match` notification routes to the session whose `pub_sub_id`
/// it carries, never the other one.
#[tokio::test]
async fn interface_change_fans_out_and_match_routes_by_pub_sub_id() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    manager.handle(Event::Command(connect_cmd(&recorder, 2)));
    assert_eq!(recorder.count_matching("client[2].on_connect_success"), 1);

    manager.handle(Event::Notification(HalNotification::InterfaceAddressChange {
        mac: MacAddr([9, 9, 9, 9, 9, 9]),
    }));
    assert_eq!(recorder.count_matching("on_interface_address_change(09:09:09:09:09:09)"), 2);
    assert_eq!(manager.current_discovery_interface_mac, MacAddr([9, 9, 9, 9, 9, 9]));

    manager.handle(Event::Command(publish_cmd(&recorder, 1, "s1")));
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(2),
        is_publish: true,
        pub_sub_id: PubSubId(11),
    }));
    manager.handle(Event::Command(subscribe_cmd(&recorder, 2, "s2")));
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(3),
        is_publish: false,
        pub_sub_id: PubSubId(22),
    }));

    manager.handle(Event::Notification(HalNotification::Match {
        pub_sub_id: PubSubId(22),
        peer_id: PeerInstanceId(5),
        peer_mac: MacAddr([1, 2, 3, 4, 5, 6]),
        ssi: vec![1, 2],
        filter: vec![],
    }));

    assert_eq!(recorder.count_matching("s2.on_match"), 1);
    assert_eq!(recorder.count_matching("s1.on_match"), 0);
}

/// A send-message-timeout expiry fails the oldest outstanding message with
/// `ReasonCode::Timeout` and re-arms the timer for whatever remains.
#[tokio::test]
async fn send_message_timeout_fails_the_oldest_outstanding_message() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    manager.handle(Event::Command(publish_cmd(&recorder, 1, "s1")));
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(2),
        is_publish: true,
        pub_sub_id: PubSubId(5),
    }));
    manager.handle(Event::Command(Command::SendMessage {
        client_id: ClientId(1),
        session_id: SessionId(1),
        peer_id: PeerInstanceId(1),
        message_id: MessageId(1),
        payload: bytes::Bytes::from_static(b"x"),
        retry_count: 0,
    }));
    manager.handle(Event::Command(Command::TransmitNextMessage));
    manager.handle(Event::Response(HalResponse::MessageSendQueuedSuccess { tx: TransactionId(3) }));
    assert_eq!(manager.send_queue.firmware_len(), 1);

    manager.handle(Event::Timeout(TimeoutEvent::SendMessage { tx: TransactionId::NONE }));

    assert_eq!(recorder.count_matching("s1.on_message_send_fail(1, TIMEOUT)"), 1);
    assert!(manager.send_queue.is_empty());
}

/// `TERMINATE_SESSION` tears the session down locally and fires a
/// fire-and-forget HAL cancel, without ever entering `WaitForResponse`.
#[tokio::test]
async fn terminate_session_cancels_in_hal_and_removes_locally() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));
    manager.handle(Event::Command(publish_cmd(&recorder, 1, "s1")));
    manager.handle(Event::Response(HalResponse::SessionConfigSuccess {
        tx: TransactionId(2),
        is_publish: true,
        pub_sub_id: PubSubId(5),
    }));
    assert!(manager.registry.get(ClientId(1)).expect("client").session(SessionId(1)).is_some());

    manager.handle(Event::Command(Command::TerminateSession { client_id: ClientId(1), session_id: SessionId(1) }));

    assert_eq!(manager.gate.state(), GateState::Wait, "terminate_session never enters a HAL round trip");
    assert!(manager.registry.get(ClientId(1)).expect("client").session(SessionId(1)).is_none());
    assert_eq!(recorder.count_matching("hal.submit(CancelSession { pub_sub_id: PubSubId(5) })"), 1);
}

#[tokio::test]
async fn data_path_confirm_timeout_notifies_the_data_path_manager_once() {
    let recorder = Recorder::new();
    let (mut manager, _handle) = new_manager(&recorder);

    manager.handle(Event::Command(Command::EnableUsage));
    manager.handle(Event::Command(connect_cmd(&recorder, 1)));
    manager.handle(Event::Response(HalResponse::ConfigSuccess { tx: TransactionId(1) }));

    manager.handle(Event::Command(Command::InitiateDataPathSetup {
        network_specifier: "nspec-1".to_owned(),
        peer_mac: MacAddr([1, 1, 1, 1, 1, 1]),
    }));
    let tx = TransactionId(2);
    manager.handle(Event::Response(HalResponse::InitiateDataPathSuccess { tx, ndp_id: 7 }));
    assert!(manager.datapath_timers.is_pending("nspec-1"));

    manager.handle(Event::Timeout(TimeoutEvent::DataPathConfirm { network_specifier: "nspec-1".to_owned() }));

    assert_eq!(recorder.count_matching("datapath.timeout(nspec-1)"), 1);
    assert!(!manager.datapath_timers.is_pending("nspec-1"));

    // A late confirm for a timer that already expired is a no-op on the
    // timer side, but the data-path manager still hears about it.
    manager.handle(Event::Timeout(TimeoutEvent::DataPathConfirm { network_specifier: "nspec-1".to_owned() }));
    assert_eq!(recorder.count_matching("datapath.timeout(nspec-1)"), 1, "an already-expired timer fires once");
}
