// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared across the FSM, send-message queue, and client
//! callbacks (spec §7): Transient, Terminal, Programmer, Capacity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reasons a HAL command response, send-message, or session-config
/// operation can fail, reported back to client callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    /// Generic failure reported by firmware.
    Error,
    /// The 5s command-response timer fired before a real response arrived.
    /// Kept distinct from `Error` per the open question in the design notes.
    Timeout,
    /// Firmware rejected the follow-on message with no OTA ack.
    NoOtaAck,
    /// Firmware rejected the follow-on message due to a transmit failure.
    TxFail,
    /// The firmware send queue is full; back off until a completion notification.
    QueueFull,
    /// Usage of the NAN subsystem is currently disabled.
    UsageDisabled,
    /// The requested client/session/peer id is not known to the registry.
    UnknownId,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NoOtaAck => "NO_OTA_ACK",
            Self::TxFail => "TX_FAIL",
            Self::QueueFull => "QUEUE_FULL",
            Self::UsageDisabled => "USAGE_DISABLED",
            Self::UnknownId => "UNKNOWN_ID",
        }
    }

    /// Whether a send-message failure with this reason should be retried
    /// (spec §4.4, send-fail notification handling).
    pub fn is_retryable_send_failure(&self) -> bool {
        matches!(self, Self::NoOtaAck | Self::TxFail)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy from spec §7. Distinguishes how the core is expected to
/// react: retry, surface to caller, recover, or purge everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// HAL busy, response timeout, transmit TX_FAIL/NO_OTA_ACK — retried or
    /// surfaced via a failure callback, never fatal to the manager.
    Transient,
    /// NAN_DOWN, config rejected — purges state, notifies callbacks.
    Terminal,
    /// Unknown client/session id, unexpected event in state — logged at
    /// error severity, best-effort recovery, never a panic.
    Programmer,
    /// Firmware send queue full — enters `Blocked`, released on the next
    /// send-completion notification.
    Capacity,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::Terminal => "TERMINAL",
            Self::Programmer => "PROGRAMMER",
            Self::Capacity => "CAPACITY",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
