// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client/session registry (spec §3, §4.3).
//!
//! Owned directly by [`crate::manager::NanStateManager`] — no `RwLock`, no
//! `Arc`. The dispatcher is single-threaded (spec §5), so the registry is
//! plain owned state behind `&mut self` methods, unlike the teacher's
//! `PodRegistry` (`crates/cli/src/broker/registry.rs`), which is shared
//! across concurrent tasks and needs `tokio::sync::RwLock`. Same shape
//! (register/deregister/lookup), different concurrency discipline because
//! the core has none to coordinate.

mod client;
mod session;

pub use client::ClientState;
pub use session::{SessionKind, SessionState};

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ids::{ClientId, PubSubId, SessionId};

/// Registry of all connected clients and their sessions.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientState>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ClientState> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut ClientState> {
        self.clients.get_mut(&client_id)
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Insert a new client. Per spec §3, a duplicate `client_id` is a caller
    /// error: log and overwrite rather than reject.
    pub fn insert(&mut self, client: ClientState) {
        if self.clients.contains_key(&client.client_id) {
            warn!(client_id = client.client_id.0, "duplicate client_id, overwriting");
        }
        self.clients.insert(client.client_id, client);
    }

    /// Remove a client and all of its sessions. Returns the removed client,
    /// if any existed.
    pub fn remove(&mut self, client_id: ClientId) -> Option<ClientState> {
        let removed = self.clients.remove(&client_id);
        if removed.is_some() {
            debug!(client_id = client_id.0, "client removed");
        }
        removed
    }

    /// Remove every client (spec §4.3 DISCONNECT-to-empty, §5 NAN_DOWN purge).
    pub fn clear(&mut self) -> Vec<ClientState> {
        self.clients.drain().map(|(_, c)| c).collect()
    }

    /// Iterate over all live clients, mutably (interface/cluster-change
    /// broadcast fan-out).
    pub fn clients_mut(&mut self) -> impl Iterator<Item = &mut ClientState> {
        self.clients.values_mut()
    }

    /// Iterate over all live clients' config requests, for the merger.
    pub fn config_requests(&self) -> impl Iterator<Item = &crate::nan_config::ConfigRequest> {
        self.clients.values().filter_map(|c| c.config_request.as_ref())
    }

    /// Look up the (client, session) pair owning a `pub_sub_id`.
    ///
    /// Invariant: `pub_sub_id -> (client, session)` is a partial function —
    /// this scans all clients' sessions and returns the first match, which
    /// is sound only because the invariant guarantees at most one match
    /// exists among live sessions (spec §3, §8 invariant 5).
    pub fn find_by_pub_sub_id(
        &self,
        pub_sub_id: PubSubId,
    ) -> Option<(ClientId, SessionId, &SessionState)> {
        for client in self.clients.values() {
            if let Some((session_id, session)) = client.find_session_by_pub_sub_id(pub_sub_id) {
                return Some((client.client_id, session_id, session));
            }
        }
        None
    }

    pub fn find_by_pub_sub_id_mut(
        &mut self,
        pub_sub_id: PubSubId,
    ) -> Option<(ClientId, SessionId, &mut SessionState)> {
        for client in self.clients.values_mut() {
            let client_id = client.client_id;
            if let Some((session_id, session)) = client.find_session_by_pub_sub_id_mut(pub_sub_id)
            {
                return Some((client_id, session_id, session));
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
