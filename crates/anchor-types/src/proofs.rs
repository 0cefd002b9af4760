//! Aggregated proofs and per-anchor voting stats.
//!
//! All signature maps are `BTreeMap<signer, signature>` so any serialization
//! of a proof is deterministic — the canonical block hash (see
//! [`crate::block`]) relies on that ordering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Majority of quorum signatures binding `(prevBlockHash, blockId, blockHash)`
/// to an epoch. A stored AFP for block `N` proves block `N-1` of the same
/// creator is irrevocably approved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedFinalizationProof {
    /// Hash of the block preceding the voted-for block (zero seed for index 0).
    #[serde(rename = "prevBlockHash", default)]
    pub prev_block_hash: String,
    /// Canonical id `<epochIndex>:<creator>:<blockIndex>` of the voted-for block.
    #[serde(rename = "blockId", default)]
    pub block_id: String,
    /// Hash of the voted-for block.
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    /// Signer pubkey (base58) to signature (base64).
    #[serde(default)]
    pub proofs: BTreeMap<String, String>,
}

/// The latest accepted block of one anchor within one epoch, plus the AFP
/// proving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingStat {
    /// Index of the latest accepted block; `-1` when nothing is accepted yet.
    #[serde(default = "default_stat_index")]
    pub index: i64,
    /// Hash of the latest accepted block.
    #[serde(default)]
    pub hash: String,
    /// Proof that the block at `index` is approved.
    #[serde(default)]
    pub afp: AggregatedFinalizationProof,
}

fn default_stat_index() -> i64 {
    -1
}

impl Default for VotingStat {
    fn default() -> Self {
        Self {
            index: -1,
            hash: String::new(),
            afp: AggregatedFinalizationProof::default(),
        }
    }
}

/// Majority of quorum signatures attesting that `anchor` stalled at the
/// voting stat carried inside and must be rotated off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedAnchorRotationProof {
    /// Epoch the rotation applies to.
    #[serde(rename = "epochIndex")]
    pub epoch_index: u64,
    /// The anchor being rotated off.
    pub anchor: String,
    /// The last finalized position of that anchor.
    #[serde(rename = "votingStat")]
    pub voting_stat: VotingStat,
    /// Signer pubkey (base58) to signature (base64) over the rotation payload.
    #[serde(default)]
    pub signatures: BTreeMap<String, String>,
}

/// Aggregated proof that a downstream leader finalized its last block.
/// The anchors core only relays these: they are accepted over HTTP, held in
/// the per-epoch mempool, and drained into block extra data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedLeaderFinalizationProof {
    /// Epoch the finalization applies to.
    #[serde(rename = "epochIndex")]
    pub epoch_index: u64,
    /// The leader whose chain tail is being finalized.
    pub leader: String,
    /// The finalized position.
    #[serde(rename = "votingStat")]
    pub voting_stat: VotingStat,
    /// Signer pubkey to signature map.
    #[serde(default)]
    pub signatures: BTreeMap<String, String>,
}

/// Per-epoch pointer of the finalization-proof hunt for the local chain.
/// Persisted under `<epochId>:PROOFS_GRABBER` so a restart resumes exactly
/// where the previous run stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofsGrabber {
    /// Epoch this grabber belongs to.
    #[serde(rename = "epochId")]
    pub epoch_id: u64,
    /// Index of the last block with a persisted AFP; `-1` before the first.
    #[serde(rename = "acceptedIndex")]
    pub accepted_index: i64,
    /// Hash of the block at `acceptedIndex` (zero seed before the first).
    #[serde(rename = "acceptedHash")]
    pub accepted_hash: String,
    /// AFP collected for the block at `acceptedIndex`.
    #[serde(rename = "afpForPrevious", default)]
    pub afp_for_previous: AggregatedFinalizationProof,
    /// Block id currently being hunted.
    #[serde(rename = "huntingForBlockId", default)]
    pub hunting_for_block_id: String,
    /// Hash of the block currently being hunted.
    #[serde(rename = "huntingForBlockHash", default)]
    pub hunting_for_block_hash: String,
}

impl ProofsGrabber {
    /// Fresh grabber for an epoch: nothing accepted, zero-seed hash.
    pub fn initial(epoch_id: u64) -> Self {
        Self {
            epoch_id,
            accepted_index: -1,
            accepted_hash: anchor_crypto::ZERO_HASH.to_string(),
            afp_for_previous: AggregatedFinalizationProof::default(),
            hunting_for_block_id: String::new(),
            hunting_for_block_hash: String::new(),
        }
    }
}

/// Record written under `BLOCK_CREATOR_HEALTH:<epoch>:<creator>` when the
/// health monitor disables an anchor for finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockCreatorHealthStatus {
    /// Epoch the creator was disabled in.
    pub epoch: u64,
    /// The disabled creator.
    pub creator: String,
    /// Wall-clock ms when the creator was disabled.
    #[serde(rename = "disabledAt")]
    pub disabled_at: u64,
    /// Human-readable reason for the operator.
    pub reason: String,
}
