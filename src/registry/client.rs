// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use crate::callbacks::ClientCallbacks;
use crate::ids::{ClientId, PubSubId, SessionId};
use crate::nan_config::ConfigRequest;

use super::session::SessionState;

/// One connected application (spec §3).
pub struct ClientState {
    pub client_id: ClientId,
    pub uid: u32,
    pub pid: u32,
    pub calling_package: String,
    pub config_request: Option<ConfigRequest>,
    pub notify_identity_change: bool,
    pub callbacks: Box<dyn ClientCallbacks>,
    sessions: HashMap<SessionId, SessionState>,
}

impl ClientState {
    pub fn new(
        client_id: ClientId,
        uid: u32,
        pid: u32,
        calling_package: String,
        config_request: Option<ConfigRequest>,
        notify_identity_change: bool,
        callbacks: Box<dyn ClientCallbacks>,
    ) -> Self {
        Self {
            client_id,
            uid,
            pid,
            calling_package,
            config_request,
            notify_identity_change,
            callbacks,
            sessions: HashMap::new(),
        }
    }

    pub fn session(&self, session_id: SessionId) -> Option<&SessionState> {
        self.sessions.get(&session_id)
    }

    pub fn session_mut(&mut self, session_id: SessionId) -> Option<&mut SessionState> {
        self.sessions.get_mut(&session_id)
    }

    pub fn insert_session(&mut self, session: SessionState) {
        self.sessions.insert(session.session_id, session);
    }

    pub fn remove_session(&mut self, session_id: SessionId) -> Option<SessionState> {
        self.sessions.remove(&session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionState> {
        self.sessions.values()
    }

    /// Consume the client, yielding its sessions (spec §5 NAN-down purge).
    pub fn into_sessions(self) -> impl Iterator<Item = SessionState> {
        self.sessions.into_values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn find_session_by_pub_sub_id(
        &self,
        pub_sub_id: PubSubId,
    ) -> Option<(SessionId, &SessionState)> {
        self.sessions
            .iter()
            .find(|(_, s)| s.pub_sub_id == pub_sub_id)
            .map(|(id, s)| (*id, s))
    }

    pub fn find_session_by_pub_sub_id_mut(
        &mut self,
        pub_sub_id: PubSubId,
    ) -> Option<(SessionId, &mut SessionState)> {
        self.sessions
            .iter_mut()
            .find(|(_, s)| s.pub_sub_id == pub_sub_id)
            .map(|(id, s)| (*id, s))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
