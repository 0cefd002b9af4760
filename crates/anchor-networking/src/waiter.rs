//! Broadcast a request to the whole quorum and resolve as soon as a majority
//! of distinct peers answered.
//!
//! Each send is a fire-and-forget task that holds the connection lock for
//! one write plus one bounded read; replies fan into a single channel that
//! the selector drains. Peers that have not answered are re-sent every
//! second until the caller's deadline. Peers whose connection failed are
//! reconnected once after the round, win or lose.
//!
//! The waiter is not reentrant — it takes `&mut self` for the duration of a
//! call, and each finalization runtime owns exactly one.

use crate::pool::PeerConnections;
use crate::PeerDirectory;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const RESEND_INTERVAL: Duration = Duration::from_secs(1);
const READ_DEADLINE: Duration = Duration::from_secs(1);

/// See the module docs.
#[derive(Default)]
pub struct QuorumWaiter {
    failed: Arc<Mutex<HashSet<String>>>,
}

impl QuorumWaiter {
    /// A fresh waiter with empty per-round state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `message` to every peer in `quorum` and waits until `majority`
    /// distinct peers replied, the deadline passed, or everyone answered.
    /// Returns the raw replies keyed by peer on success.
    pub async fn send_and_wait(
        &mut self,
        message: &str,
        quorum: &[String],
        pool: &PeerConnections,
        majority: usize,
        deadline: Duration,
        directory: &dyn PeerDirectory,
    ) -> Option<HashMap<String, Vec<u8>>> {
        self.failed.lock().clear();

        let mut answered: HashSet<String> = HashSet::with_capacity(quorum.len());
        let mut responses: HashMap<String, Vec<u8>> = HashMap::with_capacity(quorum.len());

        // The local clone keeps the channel open even when every in-flight
        // send task has finished, so `recv` below never yields `None`.
        let (tx, mut rx) = mpsc::channel::<(String, Vec<u8>)>(quorum.len().max(1));

        self.send_round(quorum.to_vec(), message, pool, &tx);

        let deadline_sleep = tokio::time::sleep(deadline);
        tokio::pin!(deadline_sleep);
        let mut resend = tokio::time::interval_at(
            tokio::time::Instant::now() + RESEND_INTERVAL,
            RESEND_INTERVAL,
        );

        loop {
            tokio::select! {
                Some((id, raw)) = rx.recv() => {
                    if answered.insert(id.clone()) {
                        responses.insert(id, raw);
                        if answered.len() >= majority {
                            self.reconnect_failed(pool, directory).await;
                            return Some(responses);
                        }
                    }
                }
                _ = resend.tick() => {
                    let pending: Vec<String> = quorum
                        .iter()
                        .filter(|id| !answered.contains(*id))
                        .cloned()
                        .collect();
                    if pending.is_empty() {
                        self.reconnect_failed(pool, directory).await;
                        return None;
                    }
                    self.send_round(pending, message, pool, &tx);
                }
                _ = &mut deadline_sleep => {
                    self.reconnect_failed(pool, directory).await;
                    return None;
                }
            }
        }
    }

    fn send_round(
        &self,
        targets: Vec<String>,
        message: &str,
        pool: &PeerConnections,
        tx: &mpsc::Sender<(String, Vec<u8>)>,
    ) {
        for id in targets {
            let Some(conn) = pool.get(&id) else {
                self.failed.lock().insert(id);
                continue;
            };
            let tx = tx.clone();
            let failed = Arc::clone(&self.failed);
            let pool = pool.clone();
            let message = message.to_string();
            tokio::spawn(async move {
                let mut guard = conn.lock().await;
                if guard.send(Message::Text(message)).await.is_err() {
                    drop(guard);
                    failed.lock().insert(id.clone());
                    pool.remove(&id);
                    return;
                }
                let reply = tokio::time::timeout(READ_DEADLINE, async {
                    while let Some(frame) = guard.next().await {
                        match frame {
                            Ok(Message::Text(text)) => return Some(text.into_bytes()),
                            Ok(Message::Binary(bytes)) => return Some(bytes),
                            Ok(_) => continue,
                            Err(_) => return None,
                        }
                    }
                    None
                })
                .await;
                drop(guard);
                match reply {
                    Ok(Some(raw)) => {
                        let _ = tx.send((id, raw)).await;
                    }
                    _ => {
                        failed.lock().insert(id.clone());
                        pool.remove(&id);
                    }
                }
            });
        }
    }

    async fn reconnect_failed(&self, pool: &PeerConnections, directory: &dyn PeerDirectory) {
        let failed: Vec<String> = {
            let mut set = self.failed.lock();
            set.drain().collect()
        };
        for id in failed {
            pool.reconnect_once(&id, directory).await;
        }
    }
}
