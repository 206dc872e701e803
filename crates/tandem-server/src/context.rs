//! Shared per-process state handed to every socket and HTTP handler.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tandem_core::models::DisconnectReason;
use tandem_core::{ChatError, ConnectionId, TransportId, UserId};
use tandem_engine::{LifecycleManager, MessageRelay, UserDirectory};
use tandem_store::ChatStore;

use crate::fanout::Fanout;
use crate::presence::SessionRegistry;
use crate::server::ServerConfig;

pub struct ChatContext {
    pub config: ServerConfig,
    pub directory: UserDirectory,
    pub lifecycle: LifecycleManager,
    pub relay: MessageRelay,
    pub registry: Arc<SessionRegistry>,
    pub fanout: Arc<Fanout>,
    pending_teardowns: DashMap<UserId, CancellationToken>,
    started_at: Instant,
}

impl ChatContext {
    pub fn new(store: Arc<dyn ChatStore>, config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let fanout = Arc::new(Fanout::new(Arc::clone(&registry)));
        let lifecycle = LifecycleManager::new(Arc::clone(&store)).with_listener(fanout.clone());
        Arc::new(Self {
            directory: UserDirectory::new(Arc::clone(&store)),
            relay: MessageRelay::new(store, config.relay),
            lifecycle,
            registry,
            fanout,
            config,
            pending_teardowns: DashMap::new(),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// A session for `user_id` joined; drop any deferred transport-lost
    /// teardown.
    pub fn cancel_pending_teardown(&self, user_id: UserId) {
        if let Some((_, token)) = self.pending_teardowns.remove(&user_id) {
            token.cancel();
            info!(user_id = %user_id, "user reconnected within grace period");
        }
    }

    /// Socket gone. If it was the user's last session and they still hold a
    /// pairing, the peer hears `userOffline` and the pairing is ended with
    /// `transport_lost`, immediately or after the grace period.
    pub fn transport_closed(self: &Arc<Self>, transport_id: &TransportId) {
        let Some(outcome) = self.registry.deregister_session(transport_id) else {
            return;
        };
        debug!(
            transport_id = %transport_id,
            user_id = %outcome.user_id,
            last_session = outcome.last_session,
            "session deregistered"
        );
        if !outcome.last_session {
            return;
        }

        let user_id = outcome.user_id;
        let connection = match self.lifecycle.current_connection_for(user_id) {
            Ok(Some(connection)) => connection,
            Ok(None) => return,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "could not read pairing after transport loss");
                return;
            }
        };
        self.fanout.user_offline(&connection, user_id);

        let grace = self.config.disconnect_grace;
        if grace.is_zero() {
            self.end_lost_pairing(connection.id, user_id);
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.pending_teardowns.insert(user_id, token.clone()) {
            previous.cancel();
        }
        info!(user_id = %user_id, connection_id = %connection.id, grace_secs = grace.as_secs(), "deferring teardown");
        let ctx = Arc::clone(self);
        let connection_id = connection.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    if token.is_cancelled() {
                        return;
                    }
                    ctx.pending_teardowns.remove_if(&user_id, |_, t| !t.is_cancelled());
                    if ctx.registry.is_online(user_id) {
                        return;
                    }
                    ctx.end_lost_pairing(connection_id, user_id);
                }
            }
        });
    }

    fn end_lost_pairing(&self, connection_id: ConnectionId, user_id: UserId) {
        match self
            .lifecycle
            .disconnect(connection_id, user_id, DisconnectReason::TransportLost)
        {
            Ok(_) => {}
            // Ended by the peer in the meantime.
            Err(ChatError::ConnectionNotActive) => {
                debug!(connection_id = %connection_id, "pairing already ended");
            }
            Err(e) => warn!(connection_id = %connection_id, error = %e, "transport-lost teardown failed"),
        }
    }
}
