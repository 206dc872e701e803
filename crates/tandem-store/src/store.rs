//! The repository interface the engine talks to, and its SQLite
//! implementation.
//!
//! Every mutating method runs as one `BEGIN IMMEDIATE` transaction. Guard
//! failures come back as [`StoreError::Rejected`] after the rollback.

use tracing::{debug, instrument, warn};

use tandem_core::models::{Connection, ConnectionRequest, Message, RequestStatus, User};
use tandem_core::{ChatError, ConnectionId, RequestId, UserId};

use crate::connections::ConnectionRepo;
use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::requests::RequestRepo;
use crate::users::UserRepo;

/// Durable record of users, requests, connections and messages.
pub trait ChatStore: Send + Sync {
    fn create_user(&self, username: &str) -> Result<User, StoreError>;
    fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Validate the pair and persist a pending request. Also returns the
    /// target's id, resolved in the same transaction.
    fn create_request(
        &self,
        from_user_id: UserId,
        to_username: &str,
    ) -> Result<(ConnectionRequest, UserId), StoreError>;
    fn request(&self, id: RequestId) -> Result<Option<ConnectionRequest>, StoreError>;
    fn pending_requests_for(&self, username: &str) -> Result<Vec<ConnectionRequest>, StoreError>;

    /// Atomically accept: request → accepted, new connected pairing, both
    /// users claimed. Returns the pairing and the resolved request.
    fn accept_request(
        &self,
        request_id: RequestId,
        accepting_user_id: UserId,
    ) -> Result<(Connection, ConnectionRequest), StoreError>;
    fn reject_request(
        &self,
        request_id: RequestId,
        rejecting_user_id: UserId,
    ) -> Result<ConnectionRequest, StoreError>;

    fn connection(&self, id: ConnectionId) -> Result<Option<Connection>, StoreError>;
    fn active_connection_for(&self, user_id: UserId) -> Result<Option<Connection>, StoreError>;

    /// Atomically end a live pairing and release both users.
    fn end_connection(
        &self,
        connection_id: ConnectionId,
        requesting_user_id: UserId,
    ) -> Result<Connection, StoreError>;

    /// Status check and insert in one transaction.
    fn append_message(
        &self,
        connection_id: ConnectionId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, StoreError>;
    fn messages(
        &self,
        connection_id: ConnectionId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl ChatStore for SqliteStore {
    fn create_user(&self, username: &str) -> Result<User, StoreError> {
        self.db.with_tx(|tx| UserRepo::create(tx, username))
    }

    fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.db.with_conn(|conn| UserRepo::get(conn, id))
    }

    fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.db.with_conn(|conn| UserRepo::by_username(conn, username))
    }

    #[instrument(skip(self), fields(from_user_id = %from_user_id))]
    fn create_request(
        &self,
        from_user_id: UserId,
        to_username: &str,
    ) -> Result<(ConnectionRequest, UserId), StoreError> {
        self.db.with_tx(|tx| {
            let from = UserRepo::get(tx, from_user_id)?
                .ok_or_else(|| ChatError::InvalidTarget(format!("user {from_user_id}")))?;
            let to = UserRepo::by_username(tx, to_username)?
                .ok_or_else(|| ChatError::InvalidTarget(to_username.to_string()))?;
            if from.id == to.id {
                return Err(ChatError::SelfTarget.into());
            }
            if from.current_connection_id.is_some() {
                return Err(ChatError::AlreadyConnected(from.username).into());
            }
            if to.current_connection_id.is_some() {
                return Err(ChatError::AlreadyConnected(to.username).into());
            }
            if RequestRepo::has_pending(tx, from.id, &to.username)? {
                return Err(ChatError::DuplicateRequest(to.username).into());
            }
            let request = RequestRepo::create(tx, &from, &to.username)?;
            Ok((request, to.id))
        })
    }

    fn request(&self, id: RequestId) -> Result<Option<ConnectionRequest>, StoreError> {
        self.db.with_conn(|conn| RequestRepo::get(conn, id))
    }

    fn pending_requests_for(&self, username: &str) -> Result<Vec<ConnectionRequest>, StoreError> {
        self.db.with_conn(|conn| RequestRepo::pending_for(conn, username))
    }

    #[instrument(skip(self), fields(request_id = %request_id, user_id = %accepting_user_id))]
    fn accept_request(
        &self,
        request_id: RequestId,
        accepting_user_id: UserId,
    ) -> Result<(Connection, ConnectionRequest), StoreError> {
        self.db.with_tx(|tx| {
            let mut request = RequestRepo::get(tx, request_id)?
                .ok_or_else(|| ChatError::NotFound(format!("connection request {request_id}")))?;
            if request.status.is_terminal() {
                return Err(ChatError::RequestNotPending.into());
            }
            let acceptor = UserRepo::get(tx, accepting_user_id)?
                .ok_or_else(|| ChatError::Unauthorized(format!("unknown user {accepting_user_id}")))?;
            if acceptor.username != request.to_username {
                return Err(ChatError::Unauthorized(
                    "only the addressee can answer a connection request".into(),
                )
                .into());
            }
            let requester = UserRepo::get(tx, request.from_user_id)?
                .ok_or_else(|| ChatError::NotFound(format!("user {}", request.from_user_id)))?;

            let connection = ConnectionRepo::insert_connected(tx, &requester, &acceptor)?;
            let claimed = UserRepo::claim_pair(tx, requester.id, acceptor.id, connection.id)?;
            if claimed != 2 {
                debug!(claimed, "compare-and-set lost, rolling back accept");
                return Err(ChatError::ConflictAlreadyConnected.into());
            }
            if RequestRepo::resolve(tx, request.id, RequestStatus::Accepted)? != 1 {
                return Err(ChatError::RequestNotPending.into());
            }
            request.status = RequestStatus::Accepted;
            Ok((connection, request))
        })
    }

    #[instrument(skip(self), fields(request_id = %request_id, user_id = %rejecting_user_id))]
    fn reject_request(
        &self,
        request_id: RequestId,
        rejecting_user_id: UserId,
    ) -> Result<ConnectionRequest, StoreError> {
        self.db.with_tx(|tx| {
            let mut request = RequestRepo::get(tx, request_id)?
                .ok_or_else(|| ChatError::NotFound(format!("connection request {request_id}")))?;
            if request.status.is_terminal() {
                return Err(ChatError::RequestNotPending.into());
            }
            let rejecter = UserRepo::get(tx, rejecting_user_id)?
                .ok_or_else(|| ChatError::Unauthorized(format!("unknown user {rejecting_user_id}")))?;
            if rejecter.username != request.to_username {
                return Err(ChatError::Unauthorized(
                    "only the addressee can answer a connection request".into(),
                )
                .into());
            }
            if RequestRepo::resolve(tx, request.id, RequestStatus::Rejected)? != 1 {
                return Err(ChatError::RequestNotPending.into());
            }
            request.status = RequestStatus::Rejected;
            Ok(request)
        })
    }

    fn connection(&self, id: ConnectionId) -> Result<Option<Connection>, StoreError> {
        self.db.with_conn(|conn| ConnectionRepo::get(conn, id))
    }

    fn active_connection_for(&self, user_id: UserId) -> Result<Option<Connection>, StoreError> {
        self.db.with_conn(|conn| {
            match UserRepo::current_connection_id(conn, user_id)? {
                Some(id) => {
                    let found = ConnectionRepo::get(conn, id)?.filter(Connection::is_active);
                    if found.is_none() {
                        warn!(user_id = %user_id, connection_id = %id, "current connection points at an inactive pairing");
                    }
                    Ok(found)
                }
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(connection_id = %connection_id, user_id = %requesting_user_id))]
    fn end_connection(
        &self,
        connection_id: ConnectionId,
        requesting_user_id: UserId,
    ) -> Result<Connection, StoreError> {
        self.db.with_tx(|tx| {
            let connection = ConnectionRepo::get(tx, connection_id)?
                .ok_or_else(|| ChatError::NotFound(format!("connection {connection_id}")))?;
            if !connection.is_active() {
                return Err(ChatError::ConnectionNotActive.into());
            }
            if !connection.involves(requesting_user_id) {
                return Err(ChatError::Unauthorized(
                    "not a participant of this connection".into(),
                )
                .into());
            }
            if ConnectionRepo::end(tx, connection_id, requesting_user_id)? != 1 {
                return Err(ChatError::ConnectionNotActive.into());
            }
            UserRepo::release(tx, connection_id)?;
            ConnectionRepo::get(tx, connection_id)?
                .ok_or_else(|| StoreError::NotFound(format!("connection {connection_id}")))
        })
    }

    #[instrument(skip(self, content), fields(connection_id = %connection_id, sender_id = %sender_id))]
    fn append_message(
        &self,
        connection_id: ConnectionId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.db.with_tx(|tx| {
            let connection = ConnectionRepo::get(tx, connection_id)?
                .filter(Connection::is_active)
                .ok_or(ChatError::ConnectionNotActive)?;
            let sender_username = connection
                .username_of(sender_id)
                .ok_or_else(|| {
                    ChatError::Unauthorized("sender is not a participant of this connection".into())
                })?
                .to_string();
            MessageRepo::append(tx, connection_id, sender_id, &sender_username, content)
        })
    }

    fn messages(
        &self,
        connection_id: ConnectionId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            if ConnectionRepo::get(conn, connection_id)?.is_none() {
                return Err(StoreError::NotFound(format!("connection {connection_id}")));
            }
            MessageRepo::page(conn, connection_id, limit, offset)
        })
    }
}
