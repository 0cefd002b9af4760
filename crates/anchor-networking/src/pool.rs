//! Persistent outbound websocket connections, one per quorum peer.
//!
//! Each connection lives behind an async mutex: the transport disallows
//! concurrent writes, and every request/reply exchange holds the lock for
//! its full duration, which also keeps replies paired with their requests.

use crate::{NetError, PeerDirectory};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// One live outbound websocket connection.
pub type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Dials a websocket endpoint with a bounded timeout.
pub async fn dial(url: &str) -> Result<WsConnection, NetError> {
    let attempt = tokio::time::timeout(DIAL_TIMEOUT, connect_async(url));
    match attempt.await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(NetError::Dial(e.to_string())),
        Err(_) => Err(NetError::Dial(format!("dial timeout for {url}"))),
    }
}

/// The per-epoch pool of peer connections, keyed by anchor pubkey.
/// Cloning is cheap and shares the underlying pool.
#[derive(Clone, Default)]
pub struct PeerConnections {
    inner: Arc<DashMap<String, Arc<tokio::sync::Mutex<WsConnection>>>>,
}

impl PeerConnections {
    /// An empty pool; connections are established lazily.
    pub fn new() -> Self {
        Self::default()
    }

    /// The connection of one peer, if currently established.
    pub fn get(&self, pubkey: &str) -> Option<Arc<tokio::sync::Mutex<WsConnection>>> {
        self.inner.get(pubkey).map(|entry| entry.value().clone())
    }

    /// Registers a connection for a peer (used by tests and reconnects).
    pub fn insert(&self, pubkey: &str, conn: WsConnection) {
        self.inner
            .insert(pubkey.to_string(), Arc::new(tokio::sync::Mutex::new(conn)));
    }

    /// Drops a connection (after an I/O failure).
    pub fn remove(&self, pubkey: &str) {
        self.inner.remove(pubkey);
    }

    /// Dials every quorum member that has a published websocket URL and no
    /// live connection yet. Dial failures are skipped; the waiter retries
    /// them once per round.
    pub async fn ensure_quorum(&self, quorum: &[String], directory: &dyn PeerDirectory) {
        for pubkey in quorum {
            if self.inner.contains_key(pubkey) {
                continue;
            }
            let Some(url) = directory.wss_url(pubkey) else {
                continue;
            };
            match dial(&url).await {
                Ok(conn) => self.insert(pubkey, conn),
                Err(e) => {
                    tracing::debug!(target: "networking", peer = %pubkey, "dial failed: {e}");
                }
            }
        }
    }

    /// Single reconnect attempt for one peer.
    pub async fn reconnect_once(&self, pubkey: &str, directory: &dyn PeerDirectory) {
        let Some(url) = directory.wss_url(pubkey) else {
            return;
        };
        if let Ok(conn) = dial(&url).await {
            self.insert(pubkey, conn);
        }
    }

    /// Sends `message` to every connected peer in `quorum` and collects all
    /// replies that arrive within `deadline`. Unlike the waiter there is no
    /// majority short-circuit: callers want every answer they can get (the
    /// health monitor picks the best one).
    pub async fn broadcast_collect(
        &self,
        quorum: &[String],
        message: &str,
        deadline: Duration,
    ) -> Vec<(String, Vec<u8>)> {
        use futures::{SinkExt, StreamExt};
        let exchanges = quorum.iter().filter_map(|peer| {
            let conn = self.get(peer)?;
            let peer = peer.clone();
            let pool = self.clone();
            let message = message.to_string();
            Some(async move {
                let mut guard = conn.lock().await;
                if guard
                    .send(tokio_tungstenite::tungstenite::Message::Text(message))
                    .await
                    .is_err()
                {
                    drop(guard);
                    pool.remove(&peer);
                    return None;
                }
                let reply = tokio::time::timeout(deadline, async {
                    while let Some(frame) = guard.next().await {
                        match frame {
                            Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                                return Some(text.into_bytes())
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(bytes)) => {
                                return Some(bytes)
                            }
                            Ok(_) => continue,
                            Err(_) => return None,
                        }
                    }
                    None
                })
                .await;
                drop(guard);
                match reply {
                    Ok(Some(raw)) => Some((peer, raw)),
                    _ => {
                        pool.remove(&peer);
                        None
                    }
                }
            })
        });
        futures::future::join_all(exchanges)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Closes and forgets every connection. Called on epoch eviction.
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, conn)) = self.inner.remove(&key) {
                let mut conn = conn.lock().await;
                let _ = futures::SinkExt::close(&mut *conn).await;
            }
        }
    }
}
