//! Epoch handlers and the sliding window of supported epochs.

use anchor_crypto::hash_blake3;
use serde::{Deserialize, Serialize};

/// Network-wide parameters fixed by genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    /// Number of quorum members selected per epoch.
    #[serde(rename = "QUORUM_SIZE")]
    pub quorum_size: usize,
    /// Epoch duration in ms.
    #[serde(rename = "EPOCH_DURATION")]
    pub epoch_duration: u64,
    /// Target interval between locally generated blocks, ms.
    #[serde(rename = "BLOCK_TIME")]
    pub block_time: u64,
    /// Maximum number of concurrently supported epochs (window size W >= 1).
    #[serde(rename = "MAX_EPOCHS_TO_SUPPORT")]
    pub max_epochs_to_support: usize,
    /// Interval of the block-creators health check, ms.
    #[serde(rename = "BLOCK_CREATORS_HEALTH_CHECK_INTERVAL_MS")]
    pub health_check_interval_ms: u64,
}

/// One epoch: deterministic id/hash/quorum plus its time window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochDataHandler {
    /// Sequential epoch id, starting at 0.
    pub id: u64,
    /// Blake3 seed-chain hash of this epoch.
    pub hash: String,
    /// Immutable committee roster, inherited from genesis.
    #[serde(rename = "anchorsRegistry")]
    pub anchors_registry: Vec<String>,
    /// Deterministically selected finalization quorum.
    pub quorum: Vec<String>,
    /// Start of the epoch, ms since the Unix epoch.
    #[serde(rename = "startTimestamp")]
    pub start_timestamp: u64,
}

impl EpochDataHandler {
    /// Canonical `<hash>#<id>` string used inside signed payloads.
    pub fn full_id(&self) -> String {
        format!("{}#{}", self.hash, self.id)
    }

    /// Whether the epoch window is still open at `now_ms`.
    pub fn is_fresh(&self, params: &NetworkParameters, now_ms: u64) -> bool {
        self.start_timestamp + params.epoch_duration > now_ms
    }

    /// BFT majority over the quorum: `2q/3 + 1`, clamped to `q`.
    pub fn majority(&self) -> usize {
        let quorum_size = self.quorum.len();
        let majority = (2 * quorum_size) / 3 + 1;
        majority.min(quorum_size)
    }

    /// Derives the handler of the next epoch: `id + 1`, hash chained through
    /// Blake3, the registry inherited verbatim, and the quorum re-picked from
    /// the new seed.
    pub fn derive_next(&self, params: &NetworkParameters) -> EpochDataHandler {
        let next_hash = hash_blake3(&self.hash);
        let quorum = select_quorum(&self.anchors_registry, params.quorum_size, &next_hash);
        EpochDataHandler {
            id: self.id + 1,
            hash: next_hash,
            anchors_registry: self.anchors_registry.clone(),
            quorum,
            start_timestamp: self.start_timestamp + params.epoch_duration,
        }
    }
}

/// Deterministic pseudo-random pick of `quorum_size` registry members,
/// seeded by the epoch hash: members are ranked by
/// `Blake3(seed ∥ pubkey)` and the lowest digests win. When the registry is
/// not larger than the requested size the whole registry is the quorum.
pub fn select_quorum(registry: &[String], quorum_size: usize, seed: &str) -> Vec<String> {
    if registry.len() <= quorum_size {
        return registry.to_vec();
    }
    let mut ranked: Vec<(String, &String)> = registry
        .iter()
        .map(|pk| (hash_blake3(&format!("{seed}{pk}")), pk))
        .collect();
    ranked.sort();
    ranked
        .into_iter()
        .take(quorum_size)
        .map(|(_, pk)| pk.clone())
        .collect()
}

/// Process-wide approvement-thread state: the network parameters plus the
/// sliding window of supported epochs, newest last. Persisted as one JSON
/// record under the `AT` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovementThreadState {
    /// Parameters fixed by genesis.
    #[serde(rename = "networkParameters")]
    pub network_parameters: NetworkParameters,
    /// The resident epoch window, ordered by id.
    #[serde(rename = "supportedEpochs", default)]
    pub supported_epochs: Vec<EpochDataHandler>,
}

impl ApprovementThreadState {
    /// The current (latest) epoch, if the window is non-empty.
    pub fn current_epoch(&self) -> Option<&EpochDataHandler> {
        self.supported_epochs.last()
    }

    /// Defensive copy of the whole window.
    pub fn epoch_handlers(&self) -> Vec<EpochDataHandler> {
        self.supported_epochs.clone()
    }

    /// Finds an epoch by its `<hash>#<id>` full id, returning an owned copy.
    pub fn find_by_full_id(&self, full_id: &str) -> Option<EpochDataHandler> {
        self.supported_epochs
            .iter()
            .find(|epoch| epoch.full_id() == full_id)
            .cloned()
    }

    /// Finds an epoch by numeric id, returning an owned copy.
    pub fn find_by_id(&self, id: u64) -> Option<EpochDataHandler> {
        self.supported_epochs
            .iter()
            .find(|epoch| epoch.id == id)
            .cloned()
    }
}

/// Per-epoch block pointer of the local generator. Persisted under
/// `GT:<epochFullId>` in the `BLOCKS` store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationThreadMetadata {
    /// Epoch this pointer belongs to.
    #[serde(rename = "epochFullId")]
    pub epoch_full_id: String,
    /// Hash of the last generated block (zero seed before the first).
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    /// Index of the next block to mint.
    #[serde(rename = "nextIndex")]
    pub next_index: u64,
}

impl GenerationThreadMetadata {
    /// Fresh pointer for an epoch that has no generated blocks yet.
    pub fn initial(epoch_full_id: String) -> Self {
        Self {
            epoch_full_id,
            prev_hash: anchor_crypto::ZERO_HASH.to_string(),
            next_index: 0,
        }
    }
}
