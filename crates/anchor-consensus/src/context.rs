//! The dependency-injected process context.
//!
//! Three singletons are unavoidable — configuration, genesis, and the epoch
//! registry — so they are owned by one [`NodeContext`] that every task and
//! handler receives by `Arc`. Tests build a context over temp stores and
//! fakes instead of monkey-patching globals.

use crate::locks::CreatorLockRegistry;
use crate::mempool::ProofMempool;
use crate::runtime::{FinalizationRuntimes, QuorumChannel};
use anchor_crypto::{CryptoError, KeyPair};
use anchor_networking::pod::PodClient;
use anchor_networking::PeerDirectory;
use anchor_storage::Stores;
use anchor_types::config::NodeConfig;
use anchor_types::epoch::{ApprovementThreadState, EpochDataHandler, NetworkParameters};
use anchor_types::genesis::{AnchorStorage, Genesis};
use anchor_types::keys::anchor_storage_key;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One quorum member resolved to its HTTP endpoint.
#[derive(Debug, Clone)]
pub struct QuorumMember {
    /// Base58 public key.
    pub pubkey: String,
    /// HTTP base URL (may be empty when unpublished).
    pub url: String,
}

/// Everything the tasks and handlers share.
pub struct NodeContext {
    /// Node configuration (immutable after startup).
    pub config: NodeConfig,
    /// The decoded signing keypair.
    pub keypair: KeyPair,
    /// The genesis record.
    pub genesis: Genesis,
    /// The four persistent namespaces.
    pub stores: Stores,
    /// The approvement-thread singleton behind its reader/writer lock. Only
    /// the epoch rotation task takes the write half.
    pub approvement: tokio::sync::RwLock<ApprovementThreadState>,
    /// Gate for read handlers; flipped off around epoch rotation.
    flood_gate: AtomicBool,
    /// Per-epoch proof mempools.
    pub mempool: ProofMempool,
    /// Per-(epoch, creator) mutex registry.
    pub creator_locks: CreatorLockRegistry,
    /// In-memory generation pointers, keyed by epoch full id.
    pub generation: Mutex<HashMap<String, anchor_types::epoch::GenerationThreadMetadata>>,
    /// Per-epoch finalization runtimes.
    pub finalization: FinalizationRuntimes,
    /// Health-monitor pull channels, keyed by epoch id.
    pub health_channels: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<QuorumChannel>>>>,
    /// Health-monitor progress snapshots, keyed by (epoch, creator).
    pub health_snapshots: Mutex<HashMap<(u64, String), (i64, String)>>,
    /// The Point-of-Distribution client.
    pub pod: PodClient,
    /// Shared HTTP client for peer endpoints.
    pub http_client: reqwest::Client,
}

impl NodeContext {
    /// Builds the context. The keypair is decoded (and checked against the
    /// configured public key) here, so a bad configuration fails startup.
    pub fn new(
        config: NodeConfig,
        genesis: Genesis,
        stores: Stores,
        state: ApprovementThreadState,
    ) -> Result<Arc<Self>, CryptoError> {
        let keypair = KeyPair::from_encoded(&config.public_key, &config.private_key)?;
        let pod = PodClient::new(config.point_of_distribution_ws.clone());
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Ok(Arc::new(Self {
            config,
            keypair,
            genesis,
            stores,
            approvement: tokio::sync::RwLock::new(state),
            flood_gate: AtomicBool::new(false),
            mempool: ProofMempool::new(),
            creator_locks: CreatorLockRegistry::new(),
            generation: Mutex::new(HashMap::new()),
            finalization: FinalizationRuntimes::new(),
            health_channels: Mutex::new(HashMap::new()),
            health_snapshots: Mutex::new(HashMap::new()),
            pod,
            http_client,
        }))
    }

    /// This node's public key.
    pub fn own_pubkey(&self) -> &str {
        &self.config.public_key
    }

    /// The network id mixed into every block hash.
    pub fn network_id(&self) -> &str {
        &self.genesis.network_id
    }

    /// Whether read handlers may proceed.
    pub fn flood_allowed(&self) -> bool {
        self.flood_gate.load(Ordering::Acquire)
    }

    /// Flips the flood gate (rotation task only).
    pub fn set_flood_gate(&self, open: bool) {
        self.flood_gate.store(open, Ordering::Release);
    }

    /// Snapshot of the resident epoch window.
    pub async fn epoch_handlers(&self) -> Vec<EpochDataHandler> {
        self.approvement.read().await.epoch_handlers()
    }

    /// Snapshot of the network parameters.
    pub async fn network_params(&self) -> NetworkParameters {
        self.approvement.read().await.network_parameters.clone()
    }

    /// An owned copy of one epoch handler, by numeric id.
    pub async fn find_epoch_by_id(&self, epoch_id: u64) -> Option<EpochDataHandler> {
        self.approvement.read().await.find_by_id(epoch_id)
    }

    /// An owned copy of one epoch handler, by `<hash>#<id>` full id.
    pub async fn find_epoch_by_full_id(&self, full_id: &str) -> Option<EpochDataHandler> {
        self.approvement.read().await.find_by_full_id(full_id)
    }

    /// The quorum of one epoch resolved to HTTP endpoints.
    pub fn quorum_members(&self, epoch_handler: &EpochDataHandler) -> Vec<QuorumMember> {
        epoch_handler
            .quorum
            .iter()
            .map(|pubkey| QuorumMember {
                pubkey: pubkey.clone(),
                url: self.http_url(pubkey).unwrap_or_default(),
            })
            .collect()
    }

    /// The health-monitor pull channel of one epoch, created on first use.
    pub fn health_channel(&self, epoch_id: u64) -> Arc<tokio::sync::Mutex<QuorumChannel>> {
        self.health_channels
            .lock()
            .entry(epoch_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(QuorumChannel::new())))
            .clone()
    }

    /// Drops all health-monitor state of one epoch, closing its pull
    /// connections. Called on epoch eviction.
    pub async fn remove_health_epoch(&self, epoch_id: u64) {
        let channel = self.health_channels.lock().remove(&epoch_id);
        if let Some(channel) = channel {
            channel.lock().await.connections.close_all().await;
        }
        self.health_snapshots
            .lock()
            .retain(|(epoch, _), _| *epoch != epoch_id);
    }
}

impl PeerDirectory for NodeContext {
    fn anchor_record(&self, pubkey: &str) -> Option<AnchorStorage> {
        self.stores
            .approvement_thread_metadata
            .get_json::<AnchorStorage>(&anchor_storage_key(pubkey))
            .ok()
            .flatten()
    }
}
