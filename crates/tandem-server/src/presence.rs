//! Live sessions, per-user device sets and room membership.
//!
//! Purely in-memory. Room membership changes only when the fan-out applies
//! a lifecycle transition or a session joins; the registry never reads the
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tandem_core::models::Connection;
use tandem_core::{ConnectionId, TransportId, UserId};

use crate::client::Transport;

struct Session {
    user_id: UserId,
    username: String,
    transport: Arc<Transport>,
    room: Option<ConnectionId>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<TransportId, Session>,
    by_user: HashMap<UserId, Vec<TransportId>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// The user had no live session before this one.
    pub first_session: bool,
    pub session_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeregisterOutcome {
    pub user_id: UserId,
    pub username: String,
    /// The user has no live session left.
    pub last_session: bool,
    pub room: Option<ConnectionId>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll a joined transport, placing it in the user's current room.
    pub fn register_session(
        &self,
        user_id: UserId,
        username: &str,
        transport: Arc<Transport>,
        active_connection: Option<&Connection>,
    ) -> RegisterOutcome {
        let tid = transport.id().clone();
        let room = active_connection.filter(|c| c.is_active()).map(|c| c.id);
        let mut inner = self.inner.write();
        inner.sessions.insert(
            tid.clone(),
            Session {
                user_id,
                username: username.to_string(),
                transport,
                room,
            },
        );
        let devices = inner.by_user.entry(user_id).or_default();
        let first_session = devices.is_empty();
        if !devices.contains(&tid) {
            devices.push(tid);
        }
        RegisterOutcome {
            first_session,
            session_count: devices.len(),
        }
    }

    pub fn deregister_session(&self, transport_id: &TransportId) -> Option<DeregisterOutcome> {
        let mut inner = self.inner.write();
        let session = inner.sessions.remove(transport_id)?;
        let last_session = match inner.by_user.get_mut(&session.user_id) {
            Some(devices) => {
                devices.retain(|t| t != transport_id);
                devices.is_empty()
            }
            None => true,
        };
        if last_session {
            inner.by_user.remove(&session.user_id);
        }
        Some(DeregisterOutcome {
            user_id: session.user_id,
            username: session.username,
            last_session,
            room: session.room,
        })
    }

    pub fn sessions_for(&self, user_id: UserId) -> Vec<Arc<Transport>> {
        let inner = self.inner.read();
        inner
            .by_user
            .get(&user_id)
            .map(|tids| {
                tids.iter()
                    .filter_map(|t| inner.sessions.get(t))
                    .map(|s| Arc::clone(&s.transport))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every session of both participants currently in the room.
    pub fn sessions_in_connection(&self, connection_id: ConnectionId) -> Vec<Arc<Transport>> {
        self.inner
            .read()
            .sessions
            .values()
            .filter(|s| s.room == Some(connection_id))
            .map(|s| Arc::clone(&s.transport))
            .collect()
    }

    /// Sessions in the room that belong to someone other than `user_id`.
    pub fn peer_sessions_in_connection(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Vec<Arc<Transport>> {
        self.inner
            .read()
            .sessions
            .values()
            .filter(|s| s.room == Some(connection_id) && s.user_id != user_id)
            .map(|s| Arc::clone(&s.transport))
            .collect()
    }

    pub fn room_of(&self, transport_id: &TransportId) -> Option<ConnectionId> {
        self.inner.read().sessions.get(transport_id).and_then(|s| s.room)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .read()
            .by_user
            .get(&user_id)
            .is_some_and(|d| !d.is_empty())
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Move every session of `user_id` into `connection_id`.
    pub fn enter_room(&self, user_id: UserId, connection_id: ConnectionId) {
        self.set_user_room(user_id, Some(connection_id));
    }

    /// Empty the room. Returns how many sessions left it.
    pub fn leave_room(&self, connection_id: ConnectionId) -> usize {
        let mut inner = self.inner.write();
        let mut left = 0;
        for session in inner.sessions.values_mut() {
            if session.room == Some(connection_id) {
                session.room = None;
                left += 1;
            }
        }
        left
    }

    /// Place one session in `connection_id` unless the fan-out already
    /// gave it a room. Returns whether the room was assigned.
    pub fn assign_room_if_unset(&self, transport_id: &TransportId, connection_id: ConnectionId) -> bool {
        match self.inner.write().sessions.get_mut(transport_id) {
            Some(session) if session.room.is_none() => {
                session.room = Some(connection_id);
                true
            }
            _ => false,
        }
    }

    /// Take one session out of `connection_id` if it is still there.
    pub fn clear_room_if(&self, transport_id: &TransportId, connection_id: ConnectionId) {
        if let Some(session) = self.inner.write().sessions.get_mut(transport_id) {
            if session.room == Some(connection_id) {
                session.room = None;
            }
        }
    }

    pub fn set_user_room(&self, user_id: UserId, room: Option<ConnectionId>) {
        let mut inner = self.inner.write();
        let Inner { sessions, by_user } = &mut *inner;
        if let Some(tids) = by_user.get(&user_id) {
            for tid in tids {
                if let Some(session) = sessions.get_mut(tid) {
                    session.room = room;
                }
            }
        }
    }

    pub fn all_transports(&self) -> Vec<Arc<Transport>> {
        self.inner
            .read()
            .sessions
            .values()
            .map(|s| Arc::clone(&s.transport))
            .collect()
    }
}
