//! Blocks and the canonical hashing rules.
//!
//! The block hash is Blake3 of the colon-joined string
//! `creator:time:networkId:epoch:canonical(extraData):index:prevHash`.
//! `canonical(extraData)` is the JSON serialization with map keys sorted,
//! proof lists sorted by `(epochIndex, creator|leader, votingStat.index)`,
//! and signature maps sorted by signer. Sorted maps come for free from
//! `BTreeMap`; the proof lists are sorted explicitly before serialization.

use crate::proofs::{AggregatedAnchorRotationProof, AggregatedLeaderFinalizationProof};
use anchor_crypto::hash_blake3;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The extra-data payload of a block.
///
/// On the wire this is a tagged union: a plain string map when no proofs are
/// attached, or an object with `rest` plus the proof arrays otherwise. The
/// custom serde impls below reproduce that shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockExtraData {
    /// Free-form string map copied from the node configuration.
    pub rest: BTreeMap<String, String>,
    /// Anchor rotation proofs drained from the local mempool.
    pub rotation_proofs: Vec<AggregatedAnchorRotationProof>,
    /// Leader finalization proofs drained from the local mempool.
    pub leader_finalization_proofs: Vec<AggregatedLeaderFinalizationProof>,
}

impl BlockExtraData {
    /// The canonical serialization used for block hashing: proof lists are
    /// sorted so that two nodes assembling the same payload in a different
    /// order still agree on the hash.
    pub fn canonical_string(&self) -> String {
        let mut sorted = self.clone();
        sorted
            .rotation_proofs
            .sort_by(|a, b| {
                (a.epoch_index, &a.anchor, a.voting_stat.index).cmp(&(
                    b.epoch_index,
                    &b.anchor,
                    b.voting_stat.index,
                ))
            });
        sorted
            .leader_finalization_proofs
            .sort_by(|a, b| {
                (a.epoch_index, &a.leader, a.voting_stat.index).cmp(&(
                    b.epoch_index,
                    &b.leader,
                    b.voting_stat.index,
                ))
            });
        // BTreeMap keys are already sorted, so this serialization is canonical.
        serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Serialize for BlockExtraData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.rotation_proofs.is_empty() && self.leader_finalization_proofs.is_empty() {
            return self.rest.serialize(serializer);
        }
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("rest", &self.rest)?;
        if !self.rotation_proofs.is_empty() {
            map.serialize_entry("rotationProofs", &self.rotation_proofs)?;
        }
        if !self.leader_finalization_proofs.is_empty() {
            map.serialize_entry("leaderFinalizationProofs", &self.leader_finalization_proofs)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BlockExtraData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Structured {
            #[serde(default)]
            rest: Option<BTreeMap<String, String>>,
            #[serde(rename = "rotationProofs", default)]
            rotation_proofs: Option<Vec<AggregatedAnchorRotationProof>>,
            #[serde(rename = "leaderFinalizationProofs", default)]
            leader_finalization_proofs: Option<Vec<AggregatedLeaderFinalizationProof>>,
        }

        let value = serde_json::Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Self::default());
        }

        if let Ok(structured) = Structured::deserialize(&value) {
            if structured.rest.is_some()
                || structured.rotation_proofs.is_some()
                || structured.leader_finalization_proofs.is_some()
            {
                return Ok(Self {
                    rest: structured.rest.unwrap_or_default(),
                    rotation_proofs: structured.rotation_proofs.unwrap_or_default(),
                    leader_finalization_proofs: structured
                        .leader_finalization_proofs
                        .unwrap_or_default(),
                });
            }
        }

        let rest = BTreeMap::<String, String>::deserialize(&value)
            .map_err(|_| serde::de::Error::custom("invalid extraData payload"))?;
        Ok(Self {
            rest,
            ..Default::default()
        })
    }
}

/// One block of a per-anchor chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Base58 public key of the producing anchor.
    pub creator: String,
    /// Production timestamp, ms since the Unix epoch (UTC).
    pub time: u64,
    /// Epoch full id (`<hash>#<id>`) the block belongs to.
    pub epoch: String,
    /// Attached extra data (config map + drained proofs).
    #[serde(rename = "extraData", default)]
    pub extra_data: BlockExtraData,
    /// Position inside the creator's chain for this epoch.
    pub index: u64,
    /// Hash of the previous block (zero seed for index 0).
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    /// Ed25519 signature of the block hash by `creator`.
    #[serde(default)]
    pub sig: String,
}

impl Block {
    /// Canonical Blake3 hash of the block.
    pub fn hash(&self, network_id: &str) -> String {
        let preimage = [
            self.creator.as_str(),
            &self.time.to_string(),
            network_id,
            self.epoch.as_str(),
            &self.extra_data.canonical_string(),
            &self.index.to_string(),
            self.prev_hash.as_str(),
        ]
        .join(":");
        hash_blake3(&preimage)
    }

    /// The canonical block id within its epoch.
    pub fn id(&self, epoch_index: u64) -> String {
        build_block_id(epoch_index, &self.creator, self.index)
    }

    /// Verifies `sig` over the canonical hash against `creator`.
    pub fn verify_signature(&self, network_id: &str) -> bool {
        anchor_crypto::verify_signature(&self.hash(network_id), &self.creator, &self.sig)
    }
}

/// Builds the canonical `<epochIndex>:<creator>:<blockIndex>` id.
pub fn build_block_id(epoch_index: u64, creator: &str, block_index: u64) -> String {
    format!("{epoch_index}:{creator}:{block_index}")
}

/// Splits a canonical block id back into `(epochIndex, creator, blockIndex)`.
pub fn parse_block_id(block_id: &str) -> Option<(u64, String, u64)> {
    let mut parts = block_id.splitn(3, ':');
    let epoch = parts.next()?.parse().ok()?;
    let creator = parts.next()?.to_string();
    let index = parts.next()?.parse().ok()?;
    if creator.is_empty() {
        return None;
    }
    Some((epoch, creator, index))
}
