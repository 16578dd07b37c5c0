// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::ids::ClientId;
use crate::nan_config::ConfigRequest;
use crate::test_support::{Recorder, RecordingClientCallbacks};

fn connect_command() -> Command {
    Command::Connect {
        client_id: ClientId(1),
        uid: 1000,
        pid: 1234,
        calling_package: "com.example.app".to_owned(),
        config: ConfigRequest::unconstrained(),
        notify_identity_change: false,
        callbacks: Box::new(RecordingClientCallbacks { recorder: Recorder::new(), client_id: 1 }),
    }
}

#[test]
fn second_command_is_deferred_while_gate_is_busy() {
    let mut gate = CommandGate::new();
    assert!(matches!(gate.admit_command(connect_command()), CommandAdmit::Process(_)));
    gate.enter_wait_for_response(TransactionId(1), connect_command());
    assert!(gate.is_busy());

    assert!(matches!(gate.admit_command(connect_command()), CommandAdmit::Deferred));
    assert!(gate.pop_deferred().is_some());
    assert!(gate.pop_deferred().is_none());
}

#[test]
fn matching_response_clears_the_gate_and_returns_the_original_command() {
    let mut gate = CommandGate::new();
    gate.enter_wait_for_response(TransactionId(5), connect_command());
    let outcome = gate.admit_response(HalResponse::ConfigSuccess { tx: TransactionId(5) });
    match outcome {
        ResponseAdmit::Process { response: HalResponse::ConfigSuccess { tx }, original } => {
            assert_eq!(tx, TransactionId(5));
            assert!(matches!(original, Command::Connect { .. }));
        }
        _ => panic!("expected a processed response"),
    }
    assert_eq!(gate.state(), GateState::Wait);
}

#[test]
fn non_matching_response_is_discarded_as_stale() {
    let mut gate = CommandGate::new();
    gate.enter_wait_for_response(TransactionId(5), connect_command());
    let outcome = gate.admit_response(HalResponse::ConfigSuccess { tx: TransactionId(6) });
    assert!(matches!(outcome, ResponseAdmit::Stale));
    assert!(gate.is_busy());
}

#[test]
fn response_while_idle_is_deferred() {
    let mut gate = CommandGate::new();
    let outcome = gate.admit_response(HalResponse::ConfigSuccess { tx: TransactionId(1) });
    assert!(matches!(outcome, ResponseAdmit::Deferred));
}

#[test]
fn matching_timeout_synthesizes_a_failure_and_reopens_the_gate() {
    let mut gate = CommandGate::new();
    gate.enter_wait_for_response(TransactionId(9), connect_command());
    let outcome = gate.admit_response_timeout(TransactionId(9));
    match outcome {
        TimeoutAdmit::Process { response: Some(HalResponse::ConfigFail { tx, reason }), original } => {
            assert_eq!(tx, TransactionId(9));
            assert_eq!(reason, ReasonCode::Timeout);
            assert!(matches!(original, Command::Connect { .. }));
        }
        _ => panic!("expected a synthesized ConfigFail"),
    }
    assert_eq!(gate.state(), GateState::Wait);
}

#[test]
fn timeout_for_a_resolved_command_is_ignored() {
    let mut gate = CommandGate::new();
    gate.enter_wait_for_response(TransactionId(1), connect_command());
    gate.admit_response(HalResponse::ConfigSuccess { tx: TransactionId(1) });
    let outcome = gate.admit_response_timeout(TransactionId(1));
    assert!(matches!(outcome, TimeoutAdmit::Stale));
}

#[test]
fn capabilities_timeout_has_nothing_to_synthesize() {
    let mut gate = CommandGate::new();
    let (respond, _rx) = tokio::sync::oneshot::channel();
    let command = Command::GetCapabilities { client_id: ClientId(1), respond };
    gate.enter_wait_for_response(TransactionId(2), command);
    let outcome = gate.admit_response_timeout(TransactionId(2));
    assert!(matches!(outcome, TimeoutAdmit::Process { response: None, .. }));
}

#[test]
fn commands_requiring_no_round_trip_stay_in_wait() {
    assert!(!requires_round_trip(&Command::EnableUsage));
    assert!(!requires_round_trip(&Command::DisableUsage));
    assert!(!requires_round_trip(&Command::CreateAllDataPathInterfaces));
    assert!(requires_round_trip(&connect_command()));
    assert!(requires_round_trip(&Command::TransmitNextMessage));
}
