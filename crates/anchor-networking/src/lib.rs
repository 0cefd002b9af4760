#![forbid(unsafe_code)]

//! # Anchor Networking
//!
//! Outbound plumbing of the anchors core: the persistent websocket pool to
//! quorum peers, the [`QuorumWaiter`] broadcast-and-collect primitive, the
//! Anchors-PoD client with its on-disk outbox, and a small JSON-POST helper
//! for peer HTTP endpoints.
//!
//! Nothing in this crate decides anything. Callers own validation; this
//! crate owns connections, deadlines, and retries.

use anchor_types::genesis::AnchorStorage;
use thiserror::Error;

/// HTTP helper for the peer endpoints.
pub mod http;
/// Persistent websocket connection pool, one connection per peer.
pub mod pool;
/// The Anchors-PoD client: request/ACK with a persistent outbox.
pub mod pod;
/// Broadcast a request to the quorum and collect a majority of replies.
pub mod waiter;

pub use pool::PeerConnections;
pub use waiter::QuorumWaiter;

/// Errors surfaced by the networking layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// Dialing a websocket endpoint failed.
    #[error("websocket dial failed: {0}")]
    Dial(String),
    /// Sending or receiving on an established connection failed.
    #[error("websocket i/o failed: {0}")]
    Io(String),
    /// The peer did not answer within the deadline.
    #[error("peer did not answer in time")]
    Timeout,
    /// No PoD endpoint is configured.
    #[error("point of distribution is not configured")]
    PodNotConfigured,
    /// An HTTP request failed at the transport level.
    #[error("http request failed: {0}")]
    Http(String),
}

/// Resolves committee members to their published endpoints.
///
/// Implemented over the `APPROVEMENT_THREAD_METADATA` store by the consensus
/// core; tests substitute an in-memory map.
pub trait PeerDirectory: Send + Sync {
    /// The stored endpoint record of one anchor, if known.
    fn anchor_record(&self, pubkey: &str) -> Option<AnchorStorage>;

    /// The websocket URL of one anchor, if published.
    fn wss_url(&self, pubkey: &str) -> Option<String> {
        self.anchor_record(pubkey)
            .map(|record| record.wss_anchor_url)
            .filter(|url| !url.is_empty())
    }

    /// The HTTP URL of one anchor, if published.
    fn http_url(&self, pubkey: &str) -> Option<String> {
        self.anchor_record(pubkey)
            .map(|record| record.anchor_url)
            .filter(|url| !url.is_empty())
    }
}
