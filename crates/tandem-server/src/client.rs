//! One live WebSocket: the outbound queue, liveness tracking and the
//! reader/writer tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use tandem_core::events::ServerEvent;
use tandem_core::TransportId;

use crate::context::ChatContext;
use crate::router::SessionRouter;

/// Handle to a connected socket. Cloned into the session registry once the
/// socket joins.
pub struct Transport {
    id: TransportId,
    tx: mpsc::Sender<String>,
    last_pong: AtomicU64,
    shutdown: CancellationToken,
}

impl Transport {
    pub fn new(tx: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self {
            id: TransportId::new(),
            tx,
            last_pong: AtomicU64::new(now_secs()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &TransportId {
        &self.id
    }

    /// Queue a pre-serialized frame. A full queue means the peer stopped
    /// reading; the transport is closed rather than buffering further.
    pub fn push_raw(&self, frame: String) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(transport_id = %self.id, msg_len = msg.len(), "send queue full, closing transport");
                self.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn push(&self, event: &ServerEvent) -> bool {
        match event.to_wire() {
            Ok(frame) => self.push_raw(frame),
            Err(e) => {
                warn!(transport_id = %self.id, event = event.event_type(), error = %e, "failed to serialize event");
                false
            }
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub(crate) fn set_last_pong(&self, secs: u64) {
        self.last_pong.store(secs, Ordering::Relaxed);
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Drive a socket from upgrade to close: writer with heartbeat, reader
/// feeding the router, join deadline. Teardown always goes through
/// [`ChatContext::transport_closed`].
#[instrument(skip_all)]
pub async fn handle_ws_connection(socket: WebSocket, ctx: Arc<ChatContext>) {
    let (tx, mut rx) = mpsc::channel::<String>(ctx.config.max_send_queue);
    let transport = Transport::new(tx);
    let transport_id = transport.id().clone();
    info!(transport_id = %transport_id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let shutdown = transport.shutdown_token();

    // Writer: outbound queue → socket, plus periodic Ping.
    let heartbeat = ctx.config.heartbeat_interval;
    let writer_shutdown = shutdown.clone();
    let writer_tid = transport_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(transport_id = %writer_tid, "sent ping");
                }
                _ = writer_shutdown.cancelled() => break,
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Reader: socket → router, pong tracking, join deadline.
    let mut router = SessionRouter::new(Arc::clone(&ctx), Arc::clone(&transport));
    let join_deadline = tokio::time::Instant::now() + ctx.config.join_timeout;
    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => router.handle_frame(text.as_str()),
                    Some(Ok(WsMessage::Pong(_))) => transport.record_pong(),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(transport_id = %transport_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(join_deadline), if !router.is_joined() => {
                info!(transport_id = %transport_id, "no join before deadline, closing");
                break;
            }
            _ = shutdown.cancelled() => break,
        }
    }

    transport.close();
    let _ = writer.await;
    ctx.transport_closed(&transport_id);
    info!(transport_id = %transport_id, "websocket disconnected");
}

/// Periodically close joined sessions that stopped answering pings. Their
/// socket tasks then run the normal teardown.
pub fn start_cleanup_task(ctx: Arc<ChatContext>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = cleanup_dead_sessions(&ctx);
            if removed > 0 {
                info!(removed, "dead session cleanup");
            }
        }
    })
}

pub fn cleanup_dead_sessions(ctx: &ChatContext) -> usize {
    let timeout = ctx.config.client_timeout;
    let mut removed = 0;
    for transport in ctx.registry.all_transports() {
        if !transport.is_closed() && !transport.is_alive(timeout) {
            info!(transport_id = %transport.id(), "closing unresponsive session");
            transport.close();
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::UserId;

    #[test]
    fn transport_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(1);
        let a = Transport::new(tx.clone());
        let b = Transport::new(tx);
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("sock_"));
    }

    #[tokio::test]
    async fn push_serializes_wire_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let t = Transport::new(tx);
        assert!(t.push(&ServerEvent::UserOnline {
            user_id: UserId::from_raw(1),
            username: "alice".into()
        }));
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "userOnline");
    }

    #[test]
    fn full_queue_closes_transport() {
        let (tx, _rx) = mpsc::channel(2);
        let t = Transport::new(tx);
        assert!(t.push_raw("a".into()));
        assert!(t.push_raw("b".into()));
        assert!(!t.is_closed());
        assert!(!t.push_raw("c".into()));
        assert!(t.is_closed());
    }

    #[test]
    fn pong_tracking() {
        let (tx, _rx) = mpsc::channel(1);
        let t = Transport::new(tx);
        assert!(t.is_alive(Duration::from_secs(90)));
        t.set_last_pong(0);
        assert!(!t.is_alive(Duration::from_secs(90)));
        t.record_pong();
        assert!(t.is_alive(Duration::from_secs(90)));
    }
}
