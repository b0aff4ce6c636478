//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! Session table
//!
//! Sessions are kept in id order, which is also connection order, with a descriptor index
//! for the poll loop. [`SessionTable::sweep`] is the only place a session is destroyed.

use crate::interpreter::DisconnectNotice;
use crate::session::Session;
use crate::types::{ConnFlags, PlayerRef, SessionId, ShutdownReason};
use std::collections::{BTreeMap, HashMap};
use std::os::fd::RawFd;
use tracing::trace;

/// Every live session
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, Session>,
    by_fd: HashMap<RawFd, SessionId>,
    next_id: u64,
}

impl SessionTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next session id
    pub(crate) fn allocate_id(&mut self) -> SessionId {
        self.next_id += 1;
        SessionId::new(self.next_id)
    }

    /// Add a session built with an id from [`allocate_id`](SessionTable::allocate_id)
    pub(crate) fn insert(&mut self, session: Session) -> SessionId {
        let id = session.id();
        self.by_fd.insert(session.fd(), id);
        self.sessions.insert(id, session);
        id
    }

    /// Take a session out for an interpreter call. Its descriptor stays indexed.
    pub(crate) fn take(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Put back a session removed with [`take`](SessionTable::take)
    pub(crate) fn restore(&mut self, session: Session) {
        self.sessions.insert(session.id(), session);
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is open
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session by id
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Mutable session by id
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Session owning descriptor `fd`
    pub fn lookup(&self, fd: RawFd) -> Option<&Session> {
        self.by_fd.get(&fd).and_then(|id| self.sessions.get(id))
    }

    /// Mutable session owning descriptor `fd`
    pub fn lookup_mut(&mut self, fd: RawFd) -> Option<&mut Session> {
        let id = *self.by_fd.get(&fd)?;
        self.sessions.get_mut(&id)
    }

    /// Sessions in connection order
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Mutable sessions in connection order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Ids in connection order
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Sessions logged in as `player`
    pub fn for_player(&mut self, player: PlayerRef) -> impl Iterator<Item = &mut Session> {
        self.sessions
            .values_mut()
            .filter(move |session| session.player() == Some(player))
    }

    /// Sessions with an identity
    pub fn connected_count(&self) -> usize {
        self.sessions.values().filter(|session| session.is_connected()).count()
    }

    /// Close session `id` at the next sweep
    pub fn mark_for_shutdown(&mut self, id: SessionId, reason: ShutdownReason) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.mark_for_shutdown(reason);
                true
            }
            None => false,
        }
    }

    /// Tear down every session marked for shutdown, and every finished HTTP exchange whose
    /// response has been written. Returns a notice per closed session.
    pub fn sweep(&mut self) -> Vec<DisconnectNotice> {
        let closing: Vec<(SessionId, ShutdownReason)> = self
            .sessions
            .values()
            .filter_map(|session| match session.shutdown_reason() {
                Some(reason) => Some((session.id(), reason)),
                None if session.flags().contains(ConnFlags::HTTP_CLOSE) && session.pending_output() == 0 => {
                    Some((session.id(), ShutdownReason::HttpDisconnect))
                }
                None => None,
            })
            .collect();

        let mut notices = Vec::with_capacity(closing.len());
        for (id, reason) in closing {
            if let Some(session) = self.remove(id) {
                trace!(session = %id, %reason, "Sweeping session");
                notices.push(session.close(reason));
            }
        }
        notices
    }

    /// Remove a session without closing it
    pub(crate) fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.by_fd.remove(&session.fd());
        Some(session)
    }

    /// Remove every session, oldest first, without closing them
    pub(crate) fn drain(&mut self) -> Vec<Session> {
        self.by_fd.clear();
        std::mem::take(&mut self.sessions).into_values().collect()
    }
}
