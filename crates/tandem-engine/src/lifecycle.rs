//! Connection request → pairing → termination state machine.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use tandem_core::models::{Connection, ConnectionRequest, DisconnectReason, Message};
use tandem_core::{ChatError, ConnectionId, ErrorClass, RequestId, UserId};
use tandem_store::ChatStore;

use crate::listener::{LifecycleEvent, LifecycleListener};

pub struct LifecycleManager {
    store: Arc<dyn ChatStore>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn emit(&self, event: LifecycleEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }

    #[instrument(skip(self), fields(from_user_id = %from_user_id))]
    pub fn send_request(
        &self,
        from_user_id: UserId,
        to_username: &str,
    ) -> Result<ConnectionRequest, ChatError> {
        let (request, target_user_id) =
            observe("send_request", self.store.create_request(from_user_id, to_username))?;
        info!(request_id = %request.id, to_username, "connection request created");
        self.emit(LifecycleEvent::RequestCreated {
            request: request.clone(),
            target_user_id,
        });
        Ok(request)
    }

    /// Pending requests addressed to `username`, oldest first.
    pub fn list_pending_requests(&self, username: &str) -> Result<Vec<ConnectionRequest>, ChatError> {
        if self.store.user_by_username(username)?.is_none() {
            return Err(ChatError::NotFound(format!("user {username}")));
        }
        Ok(self.store.pending_requests_for(username)?)
    }

    #[instrument(skip(self), fields(request_id = %request_id, user_id = %accepting_user_id))]
    pub fn accept(
        &self,
        request_id: RequestId,
        accepting_user_id: UserId,
    ) -> Result<Connection, ChatError> {
        let (connection, request) =
            observe("accept", self.store.accept_request(request_id, accepting_user_id))?;
        info!(
            connection_id = %connection.id,
            user_a_id = %connection.user_a_id,
            user_b_id = %connection.user_b_id,
            "connection established"
        );
        self.emit(LifecycleEvent::ConnectionEstablished {
            connection: connection.clone(),
            request,
        });
        Ok(connection)
    }

    #[instrument(skip(self), fields(request_id = %request_id, user_id = %rejecting_user_id))]
    pub fn reject(
        &self,
        request_id: RequestId,
        rejecting_user_id: UserId,
    ) -> Result<ConnectionRequest, ChatError> {
        let request = observe("reject", self.store.reject_request(request_id, rejecting_user_id))?;
        info!(from_user_id = %request.from_user_id, "connection request rejected");
        self.emit(LifecycleEvent::RequestRejected {
            request: request.clone(),
            rejected_by: rejecting_user_id,
        });
        Ok(request)
    }

    /// End a live pairing. Emits exactly one `ConnectionEnded`.
    #[instrument(skip(self), fields(connection_id = %connection_id, user_id = %requesting_user_id, reason = %reason))]
    pub fn disconnect(
        &self,
        connection_id: ConnectionId,
        requesting_user_id: UserId,
        reason: DisconnectReason,
    ) -> Result<Connection, ChatError> {
        let connection = observe(
            "disconnect",
            self.store.end_connection(connection_id, requesting_user_id),
        )?;
        info!("connection ended");
        self.emit(LifecycleEvent::ConnectionEnded {
            connection: connection.clone(),
            reason,
            ended_by: requesting_user_id,
        });
        Ok(connection)
    }

    pub fn current_connection_for(&self, user_id: UserId) -> Result<Option<Connection>, ChatError> {
        Ok(self.store.active_connection_for(user_id)?)
    }

    /// Current pairing plus its latest `limit` messages, oldest first.
    pub fn current_connection_with_recent(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<(Option<Connection>, Vec<Message>), ChatError> {
        if self.store.user(user_id)?.is_none() {
            return Err(ChatError::NotFound(format!("user {user_id}")));
        }
        match self.store.active_connection_for(user_id)? {
            Some(connection) => {
                let recent = self.store.messages(connection.id, limit.max(1), 0)?;
                Ok((Some(connection), recent))
            }
            None => Ok((None, Vec::new())),
        }
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Result<Connection, ChatError> {
        self.store
            .connection(connection_id)?
            .ok_or_else(|| ChatError::NotFound(format!("connection {connection_id}")))
    }

    pub fn request(&self, request_id: RequestId) -> Result<ConnectionRequest, ChatError> {
        self.store
            .request(request_id)?
            .ok_or_else(|| ChatError::NotFound(format!("connection request {request_id}")))
    }
}

/// Map a store result into the domain and log the failures worth seeing.
pub(crate) fn observe<T>(
    op: &'static str,
    result: Result<T, tandem_store::StoreError>,
) -> Result<T, ChatError> {
    result.map_err(|e| {
        let err = ChatError::from(e);
        match err.class() {
            ErrorClass::Authorization => warn!(op, error = %err, "authorization failure"),
            ErrorClass::Transport => error!(op, error = %err, "store failure"),
            _ => {}
        }
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::RecordingListener;
    use tandem_core::models::{ConnectionStatus, RequestStatus, User};
    use tandem_store::SqliteStore;

    struct Fixture {
        manager: LifecycleManager,
        recorder: Arc<RecordingListener>,
        store: Arc<SqliteStore>,
        alice: User,
        bob: User,
        carol: User,
    }

    fn setup() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let alice = store.create_user("alice").unwrap();
        let bob = store.create_user("bob").unwrap();
        let carol = store.create_user("carol").unwrap();
        let recorder = Arc::new(RecordingListener::new());
        let manager = LifecycleManager::new(store.clone()).with_listener(recorder.clone());
        Fixture {
            manager,
            recorder,
            store,
            alice,
            bob,
            carol,
        }
    }

    fn pair(f: &Fixture) -> Connection {
        let req = f.manager.send_request(f.alice.id, "bob").unwrap();
        f.manager.accept(req.id, f.bob.id).unwrap()
    }

    #[test]
    fn request_is_listed_and_announced() {
        let f = setup();
        let req = f.manager.send_request(f.alice.id, "bob").unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(f.manager.list_pending_requests("bob").unwrap(), vec![req.clone()]);

        match f.recorder.events().as_slice() {
            [LifecycleEvent::RequestCreated { request, target_user_id }] => {
                assert_eq!(request.id, req.id);
                assert_eq!(*target_user_id, f.bob.id);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn pending_for_unknown_user_is_not_found() {
        let f = setup();
        assert!(matches!(
            f.manager.list_pending_requests("ghost"),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn accept_makes_pairing_current_for_both() {
        let f = setup();
        let conn = pair(&f);
        assert_eq!(conn.status, ConnectionStatus::Connected);
        assert_eq!(conn.user_a_id, f.alice.id);
        assert_eq!(conn.user_b_id, f.bob.id);
        for user in [f.alice.id, f.bob.id] {
            assert_eq!(
                f.manager.current_connection_for(user).unwrap().map(|c| c.id),
                Some(conn.id)
            );
        }
        assert_eq!(f.recorder.kinds(), vec!["request_created", "connection_established"]);
    }

    #[test]
    fn failed_transitions_emit_nothing() {
        let f = setup();
        assert_eq!(
            f.manager.send_request(f.alice.id, "alice").unwrap_err(),
            ChatError::SelfTarget
        );
        let req = f.manager.send_request(f.alice.id, "bob").unwrap();
        assert!(matches!(
            f.manager.accept(req.id, f.carol.id),
            Err(ChatError::Unauthorized(_))
        ));
        assert_eq!(f.recorder.kinds(), vec!["request_created"]);
    }

    #[test]
    fn reject_is_terminal() {
        let f = setup();
        let req = f.manager.send_request(f.alice.id, "bob").unwrap();
        let rejected = f.manager.reject(req.id, f.bob.id).unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(
            f.manager.accept(req.id, f.bob.id).unwrap_err(),
            ChatError::RequestNotPending
        );
        assert!(f.manager.list_pending_requests("bob").unwrap().is_empty());
        assert_eq!(f.recorder.kinds(), vec!["request_created", "request_rejected"]);
    }

    #[test]
    fn second_acceptance_for_paired_user_conflicts() {
        let f = setup();
        let from_alice = f.manager.send_request(f.alice.id, "bob").unwrap();
        let from_carol = f.manager.send_request(f.carol.id, "bob").unwrap();
        f.manager.accept(from_alice.id, f.bob.id).unwrap();
        assert_eq!(
            f.manager.accept(from_carol.id, f.bob.id).unwrap_err(),
            ChatError::ConflictAlreadyConnected
        );
        assert!(f.manager.current_connection_for(f.carol.id).unwrap().is_none());
    }

    #[test]
    fn disconnect_emits_once_and_clears_both() {
        let f = setup();
        let conn = pair(&f);
        let ended = f
            .manager
            .disconnect(conn.id, f.alice.id, DisconnectReason::UserInitiated)
            .unwrap();
        assert_eq!(ended.status, ConnectionStatus::Disconnected);
        assert_eq!(
            f.manager
                .disconnect(conn.id, f.bob.id, DisconnectReason::UserInitiated)
                .unwrap_err(),
            ChatError::ConnectionNotActive
        );

        let ended_events: Vec<_> = f
            .recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, LifecycleEvent::ConnectionEnded { .. }))
            .collect();
        assert_eq!(ended_events.len(), 1);
        match &ended_events[0] {
            LifecycleEvent::ConnectionEnded { reason, ended_by, .. } => {
                assert_eq!(*reason, DisconnectReason::UserInitiated);
                assert_eq!(*ended_by, f.alice.id);
            }
            _ => unreachable!(),
        }
        assert!(f.manager.current_connection_for(f.alice.id).unwrap().is_none());
        assert!(f.manager.current_connection_for(f.bob.id).unwrap().is_none());
    }

    #[test]
    fn outsider_cannot_disconnect() {
        let f = setup();
        let conn = pair(&f);
        assert!(matches!(
            f.manager
                .disconnect(conn.id, f.carol.id, DisconnectReason::UserInitiated),
            Err(ChatError::Unauthorized(_))
        ));
        assert!(f.manager.connection(conn.id).unwrap().is_active());
    }

    #[test]
    fn current_with_recent_returns_latest_oldest_first() {
        let f = setup();
        let conn = pair(&f);
        for i in 0..4 {
            f.store.append_message(conn.id, f.alice.id, &format!("m{i}")).unwrap();
        }
        let (current, recent) = f.manager.current_connection_with_recent(f.bob.id, 3).unwrap();
        assert_eq!(current.map(|c| c.id), Some(conn.id));
        let texts: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m1", "m2", "m3"]);

        let (none, empty) = f.manager.current_connection_with_recent(f.carol.id, 3).unwrap();
        assert!(none.is_none());
        assert!(empty.is_empty());
        assert!(matches!(
            f.manager.current_connection_with_recent(UserId::from_raw(99), 3),
            Err(ChatError::NotFound(_))
        ));
    }
}
