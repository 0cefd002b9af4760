//! Client for the downstream Point of Distribution.
//!
//! Every push is a request/ACK exchange over one persistent websocket with
//! 2-second deadlines and up to 3 attempts. Payloads that never got an ACK
//! are parked in the `ANCHORS_POD_OUTBOX:` keyspace of the
//! `FINALIZATION_VOTING_STATS` store; a dedicated ticker drains the outbox.
//! Payload ids are deterministic, so a resend after a crash is idempotent on
//! the PoD side.

use crate::pool::{dial, WsConnection};
use crate::NetError;
use anchor_storage::KvStore;
use anchor_types::keys::{pod_outbox_key, POD_OUTBOX_PREFIX};
use anchor_types::wire::PodStatusResponse;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

const MAX_RETRIES: usize = 3;
const RETRY_INTERVAL: Duration = Duration::from_millis(200);
const POD_RW_DEADLINE: Duration = Duration::from_secs(2);

fn is_ack(raw: &[u8]) -> bool {
    serde_json::from_slice::<PodStatusResponse>(raw)
        .map(|resp| resp.status.eq_ignore_ascii_case("OK"))
        .unwrap_or(false)
}

/// The singleton PoD connection plus its retry policy.
pub struct PodClient {
    url: Option<String>,
    conn: tokio::sync::Mutex<Option<WsConnection>>,
}

impl PodClient {
    /// A client for the configured PoD URL; `None` disables pushing (every
    /// payload goes straight to the outbox).
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            conn: tokio::sync::Mutex::new(None),
        }
    }

    /// Sends one payload and waits for the reply, re-dialing between
    /// attempts. The connection slot doubles as the single-writer guard.
    pub async fn send_and_receive(&self, payload: &str) -> Result<Vec<u8>, NetError> {
        let Some(url) = self.url.as_deref() else {
            return Err(NetError::PodNotConfigured);
        };

        for attempt in 1..=MAX_RETRIES {
            if attempt > 1 {
                tokio::time::sleep(RETRY_INTERVAL).await;
            }

            let mut slot = self.conn.lock().await;
            if slot.is_none() {
                match dial(url).await {
                    Ok(conn) => *slot = Some(conn),
                    Err(_) => continue,
                }
            }
            let Some(conn) = slot.as_mut() else {
                continue;
            };

            let write = tokio::time::timeout(
                POD_RW_DEADLINE,
                conn.send(Message::Text(payload.to_string())),
            )
            .await;
            if !matches!(write, Ok(Ok(()))) {
                *slot = None;
                continue;
            }

            let read = tokio::time::timeout(POD_RW_DEADLINE, async {
                while let Some(frame) = conn.next().await {
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

            match read {
                Ok(Some(raw)) => return Ok(raw),
                _ => {
                    *slot = None;
                    continue;
                }
            }
        }

        Err(NetError::Timeout)
    }

    /// Pushes a payload requiring an `OK` ACK; on any failure the payload is
    /// parked in the outbox under its deterministic id. Returns whether the
    /// ACK arrived.
    pub async fn send_with_outbox(&self, outbox: &KvStore, id: &str, payload: &str) -> bool {
        if id.is_empty() || payload.is_empty() {
            return false;
        }
        let key = pod_outbox_key(id);
        match self.send_and_receive(payload).await {
            Ok(raw) if is_ack(&raw) => {
                if let Err(e) = outbox.delete(&key) {
                    tracing::warn!(target: "pod", "failed to clear outbox entry {key}: {e}");
                }
                true
            }
            _ => {
                if let Err(e) = outbox.put(&key, payload.as_bytes()) {
                    tracing::warn!(target: "pod", "failed to park payload {key}: {e}");
                }
                false
            }
        }
    }

    /// One outbox sweep: re-sends up to `limit` parked payloads, deleting
    /// each on ACK. Returns how many were acknowledged.
    pub async fn flush_outbox_once(&self, outbox: &KvStore, limit: usize) -> usize {
        let limit = if limit == 0 { 50 } else { limit };
        let entries = match outbox.scan_prefix(POD_OUTBOX_PREFIX) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(target: "pod", "outbox scan failed: {e}");
                return 0;
            }
        };

        let mut sent = 0;
        for (key, payload) in entries {
            if sent >= limit {
                break;
            }
            let Some(id) = key.strip_prefix(POD_OUTBOX_PREFIX) else {
                continue;
            };
            if payload.is_empty() {
                let _ = outbox.delete(&key);
                continue;
            }
            let Ok(payload) = String::from_utf8(payload) else {
                let _ = outbox.delete(&key);
                continue;
            };
            if self.send_with_outbox(outbox, id, &payload).await {
                sent += 1;
            }
        }
        sent
    }
}
