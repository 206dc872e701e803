//! Per-socket dispatch of inbound client events.

use std::sync::Arc;

use tracing::{debug, warn};

use tandem_core::events::{ClientEvent, ServerEvent};
use tandem_core::models::{Connection, DisconnectReason};
use tandem_core::{ChatError, ConnectionId, ErrorClass, RequestId, TransportId, UserId};

use crate::client::Transport;
use crate::context::ChatContext;

#[derive(Clone, Debug)]
struct Identity {
    user_id: UserId,
    username: String,
}

pub struct SessionRouter {
    ctx: Arc<ChatContext>,
    transport: Arc<Transport>,
    identity: Option<Identity>,
}

impl SessionRouter {
    pub fn new(ctx: Arc<ChatContext>, transport: Arc<Transport>) -> Self {
        Self {
            ctx,
            transport,
            identity: None,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.identity.is_some()
    }

    /// Handle one text frame. Every failure goes back to this socket as an
    /// `error` event.
    pub fn handle_frame(&mut self, raw: &str) {
        let result = ClientEvent::parse(raw).and_then(|event| {
            debug!(transport_id = %self.transport.id(), event = event.event_type(), "client event");
            self.dispatch(event)
        });
        if let Err(err) = result {
            match err.class() {
                ErrorClass::Authorization => {
                    warn!(transport_id = %self.transport.id(), code = err.code(), error = %err, "rejected client event")
                }
                _ => debug!(transport_id = %self.transport.id(), code = err.code(), error = %err, "client event failed"),
            }
            self.transport.push(&ServerEvent::error(&err));
        }
    }

    fn dispatch(&mut self, event: ClientEvent) -> Result<(), ChatError> {
        if let ClientEvent::Join { user_id, username } = event {
            return self.join(user_id, &username);
        }
        let me = self.identity.clone().ok_or(ChatError::NotJoined)?;
        match event {
            // Handled above.
            ClientEvent::Join { .. } => Ok(()),
            ClientEvent::SendMessage {
                connection_id,
                sender_id,
                content,
                client_ref,
            } => {
                ensure_self(&me, sender_id)?;
                let message = self.ctx.relay.send(connection_id, me.user_id, &content)?;
                self.ctx.fanout.deliver_message(&message, client_ref);
                Ok(())
            }
            ClientEvent::TypingStart { connection_id } => self.typing(&me, connection_id, true),
            ClientEvent::TypingStop { connection_id } => self.typing(&me, connection_id, false),
            ClientEvent::RequestSent {
                to_username,
                from_username,
                request_id,
            } => self.request_sent(&me, &to_username, &from_username, request_id),
            ClientEvent::RequestAccepted {
                connection_id,
                user_a_id,
                user_b_id,
            } => self.request_accepted(&me, connection_id, user_a_id, user_b_id),
            ClientEvent::Disconnect {
                connection_id,
                user_id,
            } => {
                ensure_self(&me, user_id)?;
                self.ctx
                    .lifecycle
                    .disconnect(connection_id, me.user_id, DisconnectReason::UserInitiated)?;
                Ok(())
            }
        }
    }

    /// Register first, read the pairing second. A pairing committed in
    /// between reaches this session through the fan-out, and the read never
    /// overwrites a room the fan-out already assigned.
    fn join(&mut self, user_id: UserId, username: &str) -> Result<(), ChatError> {
        if self.identity.is_some() {
            return Err(ChatError::AlreadyJoined);
        }
        let user = self.ctx.directory.verify_identity(user_id, username)?;
        let transport_id = self.transport.id().clone();
        let outcome = self.ctx.registry.register_session(
            user.id,
            &user.username,
            Arc::clone(&self.transport),
            None,
        );
        let current = match self.current_pairing(user.id, &transport_id) {
            Ok(current) => current,
            Err(e) => {
                self.ctx.registry.deregister_session(&transport_id);
                return Err(e);
            }
        };
        self.ctx.cancel_pending_teardown(user.id);
        self.identity = Some(Identity {
            user_id: user.id,
            username: user.username.clone(),
        });
        debug!(
            transport_id = %transport_id,
            user_id = %user.id,
            sessions = outcome.session_count,
            room = ?self.ctx.registry.room_of(&transport_id),
            "session joined"
        );

        if outcome.first_session {
            if let Some(connection) = &current {
                self.ctx.fanout.user_online(connection, user.id);
            }
        }
        self.transport.push(&ServerEvent::Joined {
            user_id: user.id,
            username: user.username,
            current_connection: current,
        });
        Ok(())
    }

    /// Read the user's pairing and enroll this session in it. If the pairing
    /// ended while it was being enrolled, the session is taken back out.
    fn current_pairing(
        &self,
        user_id: UserId,
        transport_id: &TransportId,
    ) -> Result<Option<Connection>, ChatError> {
        let Some(connection) = self.ctx.lifecycle.current_connection_for(user_id)? else {
            return Ok(None);
        };
        if !self.ctx.registry.assign_room_if_unset(transport_id, connection.id) {
            return Ok(Some(connection));
        }
        let still_active = self.ctx.lifecycle.connection(connection.id)?;
        if still_active.is_active() {
            Ok(Some(still_active))
        } else {
            self.ctx.registry.clear_room_if(transport_id, connection.id);
            Ok(None)
        }
    }

    fn typing(&self, me: &Identity, connection_id: ConnectionId, typing: bool) -> Result<(), ChatError> {
        if self.ctx.registry.room_of(self.transport.id()) != Some(connection_id) {
            return Err(ChatError::ConnectionNotActive);
        }
        self.ctx.fanout.typing(connection_id, me.user_id, &me.username, typing);
        Ok(())
    }

    /// Legacy announcement. The request was already pushed to its target
    /// when it was created; only validate and resync.
    fn request_sent(
        &self,
        me: &Identity,
        to_username: &str,
        from_username: &str,
        request_id: RequestId,
    ) -> Result<(), ChatError> {
        if from_username != me.username {
            return Err(ChatError::IdentityMismatch);
        }
        let request = self.ctx.lifecycle.request(request_id)?;
        if request.from_user_id != me.user_id {
            return Err(ChatError::IdentityMismatch);
        }
        if request.to_username != to_username {
            return Err(ChatError::InvalidEvent(format!(
                "request {request_id} is not addressed to {to_username}"
            )));
        }
        self.resync_room(me.user_id)
    }

    /// Legacy announcement. The pairing was already announced on accept;
    /// only validate and make sure this user's sessions are in the room.
    fn request_accepted(
        &self,
        me: &Identity,
        connection_id: ConnectionId,
        user_a_id: UserId,
        user_b_id: UserId,
    ) -> Result<(), ChatError> {
        if me.user_id != user_a_id && me.user_id != user_b_id {
            return Err(ChatError::IdentityMismatch);
        }
        let connection = self.ctx.lifecycle.connection(connection_id)?;
        if !(connection.involves(user_a_id) && connection.involves(user_b_id)) || user_a_id == user_b_id {
            return Err(ChatError::InvalidEvent(format!(
                "connection {connection_id} does not pair {user_a_id} and {user_b_id}"
            )));
        }
        if !connection.is_active() {
            return Err(ChatError::ConnectionNotActive);
        }
        self.ctx.registry.enter_room(me.user_id, connection.id);
        Ok(())
    }

    fn resync_room(&self, user_id: UserId) -> Result<(), ChatError> {
        let current = self.ctx.lifecycle.current_connection_for(user_id)?;
        self.ctx.registry.set_user_room(user_id, current.map(|c| c.id));
        Ok(())
    }
}

fn ensure_self(me: &Identity, claimed: UserId) -> Result<(), ChatError> {
    if claimed == me.user_id {
        Ok(())
    } else {
        Err(ChatError::IdentityMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tandem_core::models::{Connection, ConnectionRequest, Message, User};
    use tandem_store::{ChatStore, SqliteStore, StoreError};
    use tokio::sync::mpsc;

    use crate::server::ServerConfig;

    struct Socket {
        router: SessionRouter,
        rx: mpsc::Receiver<String>,
    }

    impl Socket {
        fn open(ctx: &Arc<ChatContext>) -> Self {
            let (tx, rx) = mpsc::channel(32);
            Self {
                router: SessionRouter::new(Arc::clone(ctx), Transport::new(tx)),
                rx,
            }
        }

        fn send(&mut self, frame: Value) {
            self.router.handle_frame(&frame.to_string());
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                out.push(serde_json::from_str(&frame).unwrap());
            }
            out
        }

        fn last_error_code(&mut self) -> String {
            let frames = self.drain();
            let last = frames.last().expect("no frames");
            assert_eq!(last["type"], "error", "got {last}");
            last["data"]["code"].as_str().unwrap().to_string()
        }

        fn join(&mut self, user: &User) {
            self.send(json!({"type": "join", "data": {"userId": user.id, "username": user.username}}));
        }
    }

    struct Fixture {
        ctx: Arc<ChatContext>,
        alice: User,
        bob: User,
        carol: User,
    }

    fn setup() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let alice = store.create_user("alice").unwrap();
        let bob = store.create_user("bob").unwrap();
        let carol = store.create_user("carol").unwrap();
        Fixture {
            ctx: ChatContext::new(store, ServerConfig::default()),
            alice,
            bob,
            carol,
        }
    }

    fn pair(f: &Fixture) -> Connection {
        let req = f.ctx.lifecycle.send_request(f.alice.id, "bob").unwrap();
        f.ctx.lifecycle.accept(req.id, f.bob.id).unwrap()
    }

    #[test]
    fn events_before_join_are_rejected() {
        let f = setup();
        let mut s = Socket::open(&f.ctx);
        s.send(json!({"type": "typingStart", "data": {"connectionId": 1}}));
        assert_eq!(s.last_error_code(), "NOT_JOINED");
        assert!(!s.router.is_joined());
    }

    #[test]
    fn malformed_frame_is_invalid_event() {
        let f = setup();
        let mut s = Socket::open(&f.ctx);
        s.router.handle_frame("{not json");
        assert_eq!(s.last_error_code(), "INVALID_EVENT");
    }

    #[test]
    fn join_checks_credentials_once() {
        let f = setup();
        let mut s = Socket::open(&f.ctx);
        s.send(json!({"type": "join", "data": {"userId": f.alice.id, "username": "bob"}}));
        assert_eq!(s.last_error_code(), "UNAUTHORIZED");

        s.join(&f.alice);
        let frames = s.drain();
        assert_eq!(frames[0]["type"], "joined");
        assert!(frames[0]["data"]["currentConnection"].is_null());

        s.join(&f.alice);
        assert_eq!(s.last_error_code(), "ALREADY_JOINED");
    }

    #[test]
    fn join_reports_current_pairing_and_tells_peer() {
        let f = setup();
        let conn = pair(&f);
        let mut bob = Socket::open(&f.ctx);
        bob.join(&f.bob);
        bob.drain();

        let mut alice = Socket::open(&f.ctx);
        alice.join(&f.alice);
        let frames = alice.drain();
        assert_eq!(frames[0]["data"]["currentConnection"]["id"], conn.id.get());

        let frames = bob.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "userOnline");
        assert_eq!(frames[0]["data"]["username"], "alice");
    }

    #[test]
    fn message_round_trip_with_client_ref() {
        let f = setup();
        let conn = pair(&f);
        let mut alice = Socket::open(&f.ctx);
        let mut bob = Socket::open(&f.ctx);
        alice.join(&f.alice);
        bob.join(&f.bob);
        alice.drain();
        bob.drain();

        alice.send(json!({"type": "sendMessage", "data": {
            "connectionId": conn.id, "senderId": f.alice.id, "content": "  hello  ", "clientRef": "c1"
        }}));
        for frames in [alice.drain(), bob.drain()] {
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["type"], "newMessage");
            assert_eq!(frames[0]["data"]["message"]["content"], "hello");
            assert_eq!(frames[0]["data"]["clientRef"], "c1");
        }
    }

    #[test]
    fn spoofed_sender_is_rejected() {
        let f = setup();
        let conn = pair(&f);
        let mut alice = Socket::open(&f.ctx);
        alice.join(&f.alice);
        alice.drain();
        alice.send(json!({"type": "sendMessage", "data": {
            "connectionId": conn.id, "senderId": f.bob.id, "content": "hi"
        }}));
        assert_eq!(alice.last_error_code(), "IDENTITY_MISMATCH");
        alice.send(json!({"type": "disconnect", "data": {"connectionId": conn.id, "userId": f.bob.id}}));
        assert_eq!(alice.last_error_code(), "IDENTITY_MISMATCH");
    }

    #[test]
    fn oversized_and_empty_messages() {
        let f = setup();
        let conn = pair(&f);
        let mut alice = Socket::open(&f.ctx);
        alice.join(&f.alice);
        alice.drain();
        let long = "x".repeat(1001);
        alice.send(json!({"type": "sendMessage", "data": {
            "connectionId": conn.id, "senderId": f.alice.id, "content": long
        }}));
        assert_eq!(alice.last_error_code(), "CONTENT_TOO_LONG");
        alice.send(json!({"type": "sendMessage", "data": {
            "connectionId": conn.id, "senderId": f.alice.id, "content": "   "
        }}));
        assert_eq!(alice.last_error_code(), "EMPTY_CONTENT");
    }

    #[test]
    fn typing_requires_room_and_skips_sender() {
        let f = setup();
        let conn = pair(&f);
        let mut alice = Socket::open(&f.ctx);
        let mut bob = Socket::open(&f.ctx);
        let mut carol = Socket::open(&f.ctx);
        alice.join(&f.alice);
        bob.join(&f.bob);
        carol.join(&f.carol);
        alice.drain();
        bob.drain();
        carol.drain();

        alice.send(json!({"type": "typingStart", "data": {"connectionId": conn.id}}));
        assert!(alice.drain().is_empty());
        let frames = bob.drain();
        assert_eq!(frames[0]["type"], "userTyping");
        assert_eq!(frames[0]["data"]["typing"], true);

        carol.send(json!({"type": "typingStart", "data": {"connectionId": conn.id}}));
        assert_eq!(carol.last_error_code(), "CONNECTION_NOT_ACTIVE");
    }

    #[test]
    fn disconnect_notifies_peer_once() {
        let f = setup();
        let conn = pair(&f);
        let mut alice = Socket::open(&f.ctx);
        let mut bob = Socket::open(&f.ctx);
        alice.join(&f.alice);
        bob.join(&f.bob);
        alice.drain();
        bob.drain();

        alice.send(json!({"type": "disconnect", "data": {"connectionId": conn.id, "userId": f.alice.id}}));
        assert!(alice.drain().is_empty());
        let frames = bob.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["reason"], "user_initiated");

        bob.send(json!({"type": "disconnect", "data": {"connectionId": conn.id, "userId": f.bob.id}}));
        assert_eq!(bob.last_error_code(), "CONNECTION_NOT_ACTIVE");
        assert!(alice.drain().is_empty());
    }

    #[test]
    fn legacy_request_sent_is_validated_not_rebroadcast() {
        let f = setup();
        let mut alice = Socket::open(&f.ctx);
        let mut bob = Socket::open(&f.ctx);
        alice.join(&f.alice);
        bob.join(&f.bob);
        alice.drain();
        bob.drain();

        let req = f.ctx.lifecycle.send_request(f.alice.id, "bob").unwrap();
        assert_eq!(bob.drain().len(), 1);

        alice.send(json!({"type": "requestSent", "data": {
            "toUsername": "bob", "fromUsername": "alice", "requestId": req.id
        }}));
        assert!(alice.drain().is_empty());
        assert!(bob.drain().is_empty());

        alice.send(json!({"type": "requestSent", "data": {
            "toUsername": "carol", "fromUsername": "alice", "requestId": req.id
        }}));
        assert_eq!(alice.last_error_code(), "INVALID_EVENT");

        bob.send(json!({"type": "requestSent", "data": {
            "toUsername": "bob", "fromUsername": "bob", "requestId": req.id
        }}));
        assert_eq!(bob.last_error_code(), "IDENTITY_MISMATCH");
    }

    #[test]
    fn legacy_request_accepted_resyncs_room() {
        let f = setup();
        let mut alice = Socket::open(&f.ctx);
        alice.join(&f.alice);
        let conn = pair(&f);
        alice.drain();
        f.ctx.registry.leave_room(conn.id);

        alice.send(json!({"type": "requestAccepted", "data": {
            "connectionId": conn.id, "userAId": f.alice.id, "userBId": f.bob.id
        }}));
        assert!(alice.drain().is_empty());
        assert_eq!(f.ctx.registry.room_of(alice.router.transport.id()), Some(conn.id));

        let mut carol = Socket::open(&f.ctx);
        carol.join(&f.carol);
        carol.drain();
        carol.send(json!({"type": "requestAccepted", "data": {
            "connectionId": conn.id, "userAId": f.alice.id, "userBId": f.bob.id
        }}));
        assert_eq!(carol.last_error_code(), "IDENTITY_MISMATCH");
    }

    type Hook = Box<dyn FnOnce() + Send>;

    /// Runs a one-shot hook right after the next pairing lookup returns.
    struct InterleavingStore {
        inner: SqliteStore,
        after_pairing_read: parking_lot::Mutex<Option<Hook>>,
    }

    impl ChatStore for InterleavingStore {
        fn create_user(&self, username: &str) -> Result<User, StoreError> {
            self.inner.create_user(username)
        }
        fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
            self.inner.user(id)
        }
        fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            self.inner.user_by_username(username)
        }
        fn create_request(
            &self,
            from_user_id: UserId,
            to_username: &str,
        ) -> Result<(ConnectionRequest, UserId), StoreError> {
            self.inner.create_request(from_user_id, to_username)
        }
        fn request(&self, id: RequestId) -> Result<Option<ConnectionRequest>, StoreError> {
            self.inner.request(id)
        }
        fn pending_requests_for(&self, username: &str) -> Result<Vec<ConnectionRequest>, StoreError> {
            self.inner.pending_requests_for(username)
        }
        fn accept_request(
            &self,
            request_id: RequestId,
            accepting_user_id: UserId,
        ) -> Result<(Connection, ConnectionRequest), StoreError> {
            self.inner.accept_request(request_id, accepting_user_id)
        }
        fn reject_request(
            &self,
            request_id: RequestId,
            rejecting_user_id: UserId,
        ) -> Result<ConnectionRequest, StoreError> {
            self.inner.reject_request(request_id, rejecting_user_id)
        }
        fn connection(&self, id: ConnectionId) -> Result<Option<Connection>, StoreError> {
            self.inner.connection(id)
        }
        fn active_connection_for(&self, user_id: UserId) -> Result<Option<Connection>, StoreError> {
            let result = self.inner.active_connection_for(user_id);
            let hook = self.after_pairing_read.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            result
        }
        fn end_connection(
            &self,
            connection_id: ConnectionId,
            requesting_user_id: UserId,
        ) -> Result<Connection, StoreError> {
            self.inner.end_connection(connection_id, requesting_user_id)
        }
        fn append_message(
            &self,
            connection_id: ConnectionId,
            sender_id: UserId,
            content: &str,
        ) -> Result<Message, StoreError> {
            self.inner.append_message(connection_id, sender_id, content)
        }
        fn messages(
            &self,
            connection_id: ConnectionId,
            limit: u32,
            offset: u32,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.messages(connection_id, limit, offset)
        }
    }

    #[test]
    fn accept_committed_during_join_reaches_the_new_session() {
        let store = Arc::new(InterleavingStore {
            inner: SqliteStore::in_memory().unwrap(),
            after_pairing_read: parking_lot::Mutex::new(None),
        });
        let alice = store.create_user("alice").unwrap();
        let bob = store.create_user("bob").unwrap();
        let ctx = ChatContext::new(store.clone(), ServerConfig::default());
        let request = ctx.lifecycle.send_request(alice.id, "bob").unwrap();

        let mut bob_socket = Socket::open(&ctx);
        bob_socket.join(&bob);
        bob_socket.drain();

        let accepting = Arc::clone(&ctx);
        let bob_id = bob.id;
        *store.after_pairing_read.lock() = Some(Box::new(move || {
            accepting.lifecycle.accept(request.id, bob_id).unwrap();
        }));

        let mut alice_socket = Socket::open(&ctx);
        alice_socket.join(&alice);
        let connection = ctx.lifecycle.current_connection_for(alice.id).unwrap().unwrap();

        assert_eq!(
            ctx.registry.room_of(alice_socket.router.transport.id()),
            Some(connection.id)
        );
        let types: Vec<Value> = alice_socket.drain().into_iter().map(|f| f["type"].clone()).collect();
        assert!(types.contains(&json!("connectionEstablished")), "got {types:?}");
        assert!(types.contains(&json!("joined")), "got {types:?}");
        bob_socket.drain();

        bob_socket.send(json!({"type": "sendMessage", "data": {
            "connectionId": connection.id, "senderId": bob.id, "content": "you there?"
        }}));
        let frames = alice_socket.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "newMessage");
        bob_socket.drain();

        alice_socket.send(json!({"type": "typingStart", "data": {"connectionId": connection.id}}));
        assert!(alice_socket.drain().is_empty());
        assert_eq!(bob_socket.drain()[0]["type"], "userTyping");
    }

    #[test]
    fn join_reports_pairing_committed_before_read() {
        let f = setup();
        let mut alice = Socket::open(&f.ctx);
        let conn = pair(&f);
        alice.join(&f.alice);
        let frames = alice.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["currentConnection"]["id"], conn.id.get());
        assert_eq!(f.ctx.registry.room_of(alice.router.transport.id()), Some(conn.id));
    }
}
