// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-in-flight state machine (spec §4.2, §9).
//!
//! At most one HAL command is outstanding at a time. While one is, new
//! commands are deferred to a side-buffer and replayed ahead of freshly
//! arrived events the next time the dispatcher looks for work — the same
//! "defer this message, replay on state entry" trick as
//! `crates/cli/src/session/transition.rs`'s detector loop, minus the
//! framework: here it's one `VecDeque`.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ReasonCode;
use crate::event::{Command, Event};
use crate::hal::HalResponse;
use crate::ids::TransactionId;

/// How long the gate waits for a response to the in-flight HAL command
/// before synthesizing a failure (spec §4.2).
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// The failure `HalResponse` to deliver in place of a real one for
/// `command`, under `reason`. Shared by the response-timeout path
/// ([`InFlightCommand::synthesize_timeout`], always `ReasonCode::Timeout`)
/// and by HAL submission failures, which are treated the same way (spec
/// §4.7) but under `ReasonCode::Error`.
///
/// `None` means this command has no response-shaped outcome to synthesize;
/// the gate still reopens, but no downstream event is manufactured.
pub fn synthesize_failure(command: &Command, tx: TransactionId, reason: ReasonCode) -> Option<HalResponse> {
    match command {
        Command::Connect { .. } | Command::Disconnect { .. } => Some(HalResponse::ConfigFail { tx, reason }),
        Command::Publish { .. }
        | Command::Subscribe { .. }
        | Command::UpdatePublish { .. }
        | Command::UpdateSubscribe { .. } => Some(HalResponse::SessionConfigFail { tx, reason }),
        Command::TransmitNextMessage => Some(HalResponse::MessageSendQueuedFail { tx, reason }),
        Command::CreateDataPathInterface { .. } => {
            Some(HalResponse::CreateInterfaceResp { tx, ok: false, reason: Some(reason) })
        }
        Command::DeleteDataPathInterface { .. } => {
            Some(HalResponse::DeleteInterfaceResp { tx, ok: false, reason: Some(reason) })
        }
        Command::InitiateDataPathSetup { .. } => Some(HalResponse::InitiateDataPathFail { tx, reason }),
        Command::RespondToDataPathRequest { .. } => {
            Some(HalResponse::RespondToDataPathSetupResp { tx, ok: false, reason: Some(reason) })
        }
        Command::EndDataPath { .. } => Some(HalResponse::EndDataPathResp { tx, ok: false, reason: Some(reason) }),
        Command::GetCapabilities { .. } => None,
        Command::TerminateSession { .. }
        | Command::SendMessage { .. }
        | Command::StartRanging { .. }
        | Command::EnableUsage
        | Command::DisableUsage
        | Command::CreateAllDataPathInterfaces
        | Command::DeleteAllDataPathInterfaces => {
            unreachable!("commands that never enter WaitForResponse cannot time out")
        }
    }
}

/// Where the gate currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Wait,
    WaitForResponse,
}

/// The command currently occupying the gate, kept around so a response
/// timeout can synthesize the failure the real response would have
/// carried (spec §4.2 `WaitForResponse` exit, §9 dedicated `Timeout`
/// reason). Not `Clone`/`Debug` for the same reason as [`Command`].
pub struct InFlightCommand {
    pub command: Command,
}

impl InFlightCommand {
    /// The failure `HalResponse` to deliver in place of a real one when
    /// the 5s response timer fires. `None` means this command has no
    /// response-shaped outcome to synthesize (e.g. a capabilities refresh
    /// with no dedicated failure channel) — the gate still reopens, but no
    /// downstream event is manufactured.
    fn synthesize_timeout(&self, tx: TransactionId) -> Option<HalResponse> {
        synthesize_failure(&self.command, tx, ReasonCode::Timeout)
    }
}

/// Does this command require a HAL round-trip (enter `WaitForResponse`),
/// or is it fully handled while remaining in `Wait` (spec §4.2)?
pub fn requires_round_trip(command: &Command) -> bool {
    !matches!(
        command,
        Command::TerminateSession { .. }
            | Command::SendMessage { .. }
            | Command::StartRanging { .. }
            | Command::EnableUsage
            | Command::DisableUsage
            | Command::CreateAllDataPathInterfaces
            | Command::DeleteAllDataPathInterfaces
    )
}

/// Outcome of offering a command to the gate.
pub enum CommandAdmit {
    /// Go ahead and process this now.
    Process(Command),
    /// The event was deferred; nothing to process this round.
    Deferred,
}

/// Outcome of offering a HAL response to the gate.
pub enum ResponseAdmit {
    /// Go ahead and process this now; `original` is the command this
    /// response answers, needed to route the success/failure outcome.
    Process { response: HalResponse, original: Command },
    /// The event was deferred; nothing to process this round.
    Deferred,
    /// A late response arrived with a non-matching transaction id; drop it.
    Stale,
}

/// Outcome of a command-response timeout firing.
pub enum TimeoutAdmit {
    /// Synthesize and process this failure in place of the real response
    /// (`response` is `None` for commands with nothing to synthesize).
    Process { response: Option<HalResponse>, original: Command },
    /// The timeout was for a command no longer in flight; ignore.
    Stale,
}

/// The command-in-flight gate plus its defer side-buffer.
pub struct CommandGate {
    state: GateState,
    in_flight: Option<(TransactionId, InFlightCommand)>,
    deferred: VecDeque<Event>,
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandGate {
    pub fn new() -> Self {
        Self { state: GateState::Wait, in_flight: None, deferred: VecDeque::new() }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state == GateState::WaitForResponse
    }

    /// Drain the defer buffer to the front; call before pulling a new
    /// event off the dispatcher's channel (spec §4.1, §9).
    pub fn pop_deferred(&mut self) -> Option<Event> {
        self.deferred.pop_front()
    }

    fn defer(&mut self, event: Event) {
        self.deferred.push_back(event);
    }

    /// Admit a command into the gate. Notifications and send-message
    /// timeouts never go through this path — spec §4.2 handles those in
    /// any state, so callers route them directly.
    pub fn admit_command(&mut self, command: Command) -> CommandAdmit {
        match self.state {
            GateState::Wait => CommandAdmit::Process(command),
            GateState::WaitForResponse => {
                debug!("command-in-flight: deferring new command");
                self.defer(Event::Command(command));
                CommandAdmit::Deferred
            }
        }
    }

    /// Record that `command` is now in flight under `tx`, having required
    /// a HAL round-trip. Call after submitting the HAL call.
    pub fn enter_wait_for_response(&mut self, tx: TransactionId, command: Command) {
        debug_assert_eq!(self.state, GateState::Wait);
        self.in_flight = Some((tx, InFlightCommand { command }));
        self.state = GateState::WaitForResponse;
    }

    /// Admit a HAL response.
    pub fn admit_response(&mut self, response: HalResponse) -> ResponseAdmit {
        match self.state {
            GateState::Wait => {
                debug!("command-in-flight: deferring out-of-sync response");
                self.defer(Event::Response(response));
                ResponseAdmit::Deferred
            }
            GateState::WaitForResponse => {
                let tx = response.transaction_id();
                match self.in_flight.take() {
                    Some((in_flight_tx, in_flight)) if in_flight_tx == tx => {
                        self.state = GateState::Wait;
                        ResponseAdmit::Process { response, original: in_flight.command }
                    }
                    other => {
                        warn!(?tx, "command-in-flight: discarding stale response");
                        self.in_flight = other;
                        ResponseAdmit::Stale
                    }
                }
            }
        }
    }

    /// Admit a command-response timeout for `tx`. Only meaningful in
    /// `WaitForResponse`; a timeout for a command no longer in flight
    /// (already resolved) is silently ignored — its timer should have
    /// been cancelled, but a race is tolerated.
    pub fn admit_response_timeout(&mut self, tx: TransactionId) -> TimeoutAdmit {
        match self.in_flight.take() {
            Some((in_flight_tx, in_flight)) if in_flight_tx == tx => {
                let synthesized = in_flight.synthesize_timeout(tx);
                self.state = GateState::Wait;
                TimeoutAdmit::Process { response: synthesized, original: in_flight.command }
            }
            other => {
                debug!(?tx, "command-in-flight: ignoring timeout for resolved command");
                self.in_flight = other;
                TimeoutAdmit::Stale
            }
        }
    }
}

#[cfg(test)]
#[path = "fsm_tests.rs"]
mod tests;
