// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NAN configuration requests and the config merger (spec §4.6).
//!
//! `merge` reduces the set of live clients' demands into a single
//! configuration the HAL can be configured with. It must satisfy the
//! algebraic properties in spec §8 invariants 7-8: `merge({c}) == c`, and
//! the merge is commutative and associative over the set of live configs.

use serde::{Deserialize, Serialize};

/// NAN cluster ID range per the 802.11 NAN spec this system implements
/// against. Used only as the merger's "no constraint" sentinel high bound.
pub const CLUSTER_ID_MAX: u16 = 0x0FFF;

/// One client's demands on the shared NAN firmware configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub support_5g_band: bool,
    pub master_preference: u8,
    pub cluster_low: u16,
    pub cluster_high: u16,
    pub notify_identity_change: bool,
}

impl ConfigRequest {
    /// The default request: no constraints on any field.
    pub const fn unconstrained() -> Self {
        Self {
            support_5g_band: false,
            master_preference: 0,
            cluster_low: 0,
            cluster_high: CLUSTER_ID_MAX,
            notify_identity_change: false,
        }
    }

    /// Whether this request's cluster range is the "no constraint" default.
    fn has_cluster_constraint(&self) -> bool {
        !(self.cluster_low == 0 && self.cluster_high == CLUSTER_ID_MAX)
    }
}

impl Default for ConfigRequest {
    fn default() -> Self {
        Self::unconstrained()
    }
}

/// Reduce an optional new request plus the existing clients' requests into a
/// single merged configuration.
///
/// Rules (spec §4.6):
/// - `support_5g_band`: logical OR of all requests.
/// - `master_preference`: maximum of all requests.
/// - cluster range: requests with the default `[0, CLUSTER_ID_MAX]` are
///   treated as unconstrained and skipped; among constrained requests,
///   `merged_low = min(lows)`, `merged_high = max(highs)`; if none are
///   constrained, the default range is returned.
/// - `notify_identity_change`: logical OR across all requests.
///
/// Returns `None` (and the caller should log) if there is nothing to merge:
/// no existing clients and no new request.
pub fn merge<'a>(
    new_request: Option<&ConfigRequest>,
    existing: impl IntoIterator<Item = &'a ConfigRequest>,
) -> Option<ConfigRequest> {
    let mut all = existing.into_iter().copied().collect::<Vec<_>>();
    if let Some(req) = new_request {
        all.push(*req);
    }

    if all.is_empty() {
        return None;
    }

    let mut merged = ConfigRequest::unconstrained();
    let mut any_cluster_constraint = false;

    for req in &all {
        merged.support_5g_band |= req.support_5g_band;
        merged.master_preference = merged.master_preference.max(req.master_preference);
        merged.notify_identity_change |= req.notify_identity_change;

        if req.has_cluster_constraint() {
            if any_cluster_constraint {
                merged.cluster_low = merged.cluster_low.min(req.cluster_low);
                merged.cluster_high = merged.cluster_high.max(req.cluster_high);
            } else {
                merged.cluster_low = req.cluster_low;
                merged.cluster_high = req.cluster_high;
                any_cluster_constraint = true;
            }
        }
    }

    Some(merged)
}

#[cfg(test)]
#[path = "nan_config_tests.rs"]
mod tests;
