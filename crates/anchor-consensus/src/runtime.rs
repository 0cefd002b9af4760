//! Per-epoch in-memory finalization runtimes.
//!
//! Each runtime pairs the grabber snapshot (shared with the generator, so it
//! sits behind a cheap blocking mutex held only for snapshots and commits)
//! with the websocket channel to the quorum (owned exclusively by one task
//! per call, behind an async mutex). Network I/O never happens under the
//! state mutex.

use anchor_networking::{PeerConnections, PeerDirectory, QuorumWaiter};
use anchor_storage::KvStore;
use anchor_types::block::Block;
use anchor_types::epoch::EpochDataHandler;
use anchor_types::keys::proofs_grabber_key;
use anchor_types::proofs::ProofsGrabber;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// The mutable grabber snapshot of one epoch.
pub struct GrabberState {
    /// The persistent pointer (mirrored to the store on every advance).
    pub grabber: ProofsGrabber,
    /// Signatures collected for the currently hunted block. Discarded the
    /// moment the AFP is persisted; never reused across indices.
    pub proofs_cache: BTreeMap<String, String>,
    /// The in-memory copy of the block being shared.
    pub block_to_share: Option<Block>,
}

/// The outbound quorum channel of one epoch: the persistent connection pool
/// plus the (non-reentrant) waiter that owns it during a call.
pub struct QuorumChannel {
    /// One persistent connection per quorum peer.
    pub connections: PeerConnections,
    /// The majority-collect primitive.
    pub waiter: QuorumWaiter,
}

impl QuorumChannel {
    /// A channel with no connections yet; peers are dialed lazily.
    pub fn new() -> Self {
        Self {
            connections: PeerConnections::new(),
            waiter: QuorumWaiter::new(),
        }
    }
}

impl Default for QuorumChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One epoch's finalization runtime.
pub struct FinalizationRuntime {
    /// Grabber snapshot, proofs cache, and shared block pointer.
    pub state: Mutex<GrabberState>,
    /// The quorum websocket channel.
    pub channel: tokio::sync::Mutex<QuorumChannel>,
}

/// Registry of finalization runtimes, keyed by epoch id.
#[derive(Default)]
pub struct FinalizationRuntimes {
    inner: Mutex<HashMap<u64, Arc<FinalizationRuntime>>>,
}

impl FinalizationRuntimes {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The runtime of one epoch, creating it on first use: the grabber is
    /// reloaded from `<epochId>:PROOFS_GRABBER` (or reinitialized to the
    /// zero seed) and the quorum connections are dialed.
    pub async fn ensure(
        &self,
        epoch_handler: &EpochDataHandler,
        stats_store: &KvStore,
        directory: &dyn PeerDirectory,
    ) -> Arc<FinalizationRuntime> {
        if let Some(runtime) = self.get(epoch_handler.id) {
            return runtime;
        }

        let grabber = stats_store
            .get_json::<ProofsGrabber>(&proofs_grabber_key(epoch_handler.id))
            .ok()
            .flatten()
            .unwrap_or_else(|| ProofsGrabber::initial(epoch_handler.id));

        let runtime = Arc::new(FinalizationRuntime {
            state: Mutex::new(GrabberState {
                grabber,
                proofs_cache: BTreeMap::new(),
                block_to_share: None,
            }),
            channel: tokio::sync::Mutex::new(QuorumChannel::new()),
        });

        {
            let mut map = self.inner.lock();
            // A racing task may have created the runtime meanwhile.
            if let Some(existing) = map.get(&epoch_handler.id) {
                return existing.clone();
            }
            map.insert(epoch_handler.id, runtime.clone());
        }

        runtime
            .channel
            .lock()
            .await
            .connections
            .ensure_quorum(&epoch_handler.quorum, directory)
            .await;

        runtime
    }

    /// The runtime of one epoch, if it exists.
    pub fn get(&self, epoch_id: u64) -> Option<Arc<FinalizationRuntime>> {
        self.inner.lock().get(&epoch_id).cloned()
    }

    /// Detaches one epoch's runtime; the caller closes its connections.
    pub fn remove(&self, epoch_id: u64) -> Option<Arc<FinalizationRuntime>> {
        self.inner.lock().remove(&epoch_id)
    }
}
