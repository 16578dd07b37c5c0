// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-`network_specifier` data-path confirmation wake-timers (spec §4.5).
//!
//! The dispatcher owns the actual `tokio::time::sleep` tasks (see
//! `crate::dispatcher`); this module only tracks which specifiers are
//! currently awaiting a confirmation, so a registration can be replaced or
//! cancelled idempotently.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Timeout on a pending data-path confirmation (spec §4.5).
pub const DATA_PATH_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of outstanding data-path confirmation timers, one per
/// `network_specifier`.
#[derive(Default)]
pub struct DataPathConfirmTimers {
    pending: HashMap<String, CancellationToken>,
}

impl DataPathConfirmTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new wake-timer for `network_specifier`, cancelling and
    /// replacing any existing registration for the same key (spec §4.5,
    /// "duplicate registrations... are replaced").
    ///
    /// Returns the [`CancellationToken`] the caller should spawn a
    /// `tokio::time::sleep(DATA_PATH_CONFIRM_TIMEOUT)` task against,
    /// selecting on the token's cancellation to short-circuit on confirm.
    pub fn register(&mut self, network_specifier: impl Into<String>) -> CancellationToken {
        let network_specifier = network_specifier.into();
        if let Some(existing) = self.pending.remove(&network_specifier) {
            debug!(network_specifier, "data-path confirm timer: replacing existing registration");
            existing.cancel();
        }
        let token = CancellationToken::new();
        self.pending.insert(network_specifier, token.clone());
        token
    }

    /// A matching data-path-confirm notification arrived; cancel and
    /// remove the timer. No-op if there was none (already expired or
    /// never registered).
    pub fn confirm(&mut self, network_specifier: &str) {
        if let Some(token) = self.pending.remove(network_specifier) {
            token.cancel();
        }
    }

    /// The wake-timer fired. Removes the registration (idempotent — a
    /// confirm racing the timer will find nothing here) and reports
    /// whether this expiry is still live and should be acted on.
    pub fn expire(&mut self, network_specifier: &str) -> bool {
        self.pending.remove(network_specifier).is_some()
    }

    pub fn is_pending(&self, network_specifier: &str) -> bool {
        self.pending.contains_key(network_specifier)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Cancel every outstanding timer (spec §5, NAN-down purge).
    pub fn clear(&mut self) {
        for (_, token) in self.pending.drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
#[path = "datapath_timers_tests.rs"]
mod tests;
