//! Turns committed lifecycle transitions and relay results into pushes to
//! the right sessions.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tandem_core::events::ServerEvent;
use tandem_core::models::{Connection, Message};
use tandem_core::{ConnectionId, UserId};
use tandem_engine::{LifecycleEvent, LifecycleListener};

use crate::client::Transport;
use crate::presence::SessionRegistry;

pub struct Fanout {
    registry: Arc<SessionRegistry>,
}

impl Fanout {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    fn push_all(targets: &[Arc<Transport>], event: &ServerEvent) -> usize {
        let frame = match event.to_wire() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.event_type(), error = %e, "failed to serialize event");
                return 0;
            }
        };
        targets.iter().filter(|t| t.push_raw(frame.clone())).count()
    }

    fn push_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        Self::push_all(&self.registry.sessions_for(user_id), event)
    }

    /// One `newMessage` to every session in the room, sender's devices
    /// included.
    pub fn deliver_message(&self, message: &Message, client_ref: Option<String>) -> usize {
        let targets = self.registry.sessions_in_connection(message.connection_id);
        let delivered = Self::push_all(
            &targets,
            &ServerEvent::NewMessage {
                message: message.clone(),
                client_ref,
            },
        );
        debug!(message_id = %message.id, delivered, "message fanned out");
        delivered
    }

    pub fn typing(&self, connection_id: ConnectionId, user_id: UserId, username: &str, typing: bool) -> usize {
        let targets = self.registry.peer_sessions_in_connection(connection_id, user_id);
        Self::push_all(
            &targets,
            &ServerEvent::UserTyping {
                connection_id,
                user_id,
                username: username.to_string(),
                typing,
            },
        )
    }

    /// Tell the peer of `user_id` in `connection` that the user came online.
    pub fn user_online(&self, connection: &Connection, user_id: UserId) -> usize {
        self.presence(connection, user_id, true)
    }

    pub fn user_offline(&self, connection: &Connection, user_id: UserId) -> usize {
        self.presence(connection, user_id, false)
    }

    fn presence(&self, connection: &Connection, user_id: UserId, online: bool) -> usize {
        let (Some(peer), Some(username)) = (connection.peer_of(user_id), connection.username_of(user_id))
        else {
            return 0;
        };
        let username = username.to_string();
        let event = if online {
            ServerEvent::UserOnline { user_id, username }
        } else {
            ServerEvent::UserOffline { user_id, username }
        };
        self.push_user(peer, &event)
    }
}

impl LifecycleListener for Fanout {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::RequestCreated {
                request,
                target_user_id,
            } => {
                let delivered = self.push_user(
                    *target_user_id,
                    &ServerEvent::NewConnectionRequest {
                        request: request.clone(),
                    },
                );
                debug!(request_id = %request.id, delivered, "request announced");
            }
            LifecycleEvent::RequestRejected { request, rejected_by } => {
                debug!(request_id = %request.id, rejected_by = %rejected_by, "request rejected, no push");
            }
            LifecycleEvent::ConnectionEstablished { connection, .. } => {
                self.registry.enter_room(connection.user_a_id, connection.id);
                self.registry.enter_room(connection.user_b_id, connection.id);
                let delivered = Self::push_all(
                    &self.registry.sessions_in_connection(connection.id),
                    &ServerEvent::ConnectionEstablished {
                        connection: connection.clone(),
                    },
                );
                info!(connection_id = %connection.id, delivered, "pairing announced");
            }
            LifecycleEvent::ConnectionEnded {
                connection,
                reason,
                ended_by,
            } => {
                let delivered = match connection.peer_of(*ended_by) {
                    Some(peer) => self.push_user(
                        peer,
                        &ServerEvent::ConnectionEnded {
                            connection_id: connection.id,
                            reason: *reason,
                            ended_by: *ended_by,
                            ended_by_username: connection
                                .username_of(*ended_by)
                                .unwrap_or_default()
                                .to_string(),
                        },
                    ),
                    None => 0,
                };
                let left = self.registry.leave_room(connection.id);
                info!(connection_id = %connection.id, %reason, delivered, left, "pairing teardown announced");
            }
        }
    }
}
