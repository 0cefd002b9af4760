//! Request/response DTOs for the peer-to-peer endpoints.

use crate::block::Block;
use crate::proofs::{
    AggregatedAnchorRotationProof, AggregatedFinalizationProof,
    AggregatedLeaderFinalizationProof, VotingStat,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Websocket route names (the `route` field of the JSON envelope).
pub mod routes {
    /// Ask a peer to vote on a candidate block.
    pub const GET_FINALIZATION_PROOF: &str = "get_finalization_proof";
    /// Fetch a stored block plus the AFP of its successor.
    pub const GET_ANCHOR_BLOCK_WITH_AFP: &str = "get_anchor_block_with_afp";
    /// Fetch a peer's persisted voting stat for an (epoch, creator) pair.
    pub const GET_VOTING_STAT: &str = "get_voting_stat";
    /// Push a finalized (block, AFP) pair into the Point of Distribution.
    pub const ACCEPT_ANCHOR_BLOCK_WITH_AFP: &str = "accept_anchor_block_with_afp";
}

/// Envelope sniffed from every incoming websocket message to pick a handler.
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    /// The route discriminator.
    #[serde(default)]
    pub route: String,
}

/// `get_finalization_proof` request: a candidate block plus the AFP proving
/// its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFinalizationProofRequest {
    /// Route discriminator.
    pub route: String,
    /// The candidate block.
    pub block: Block,
    /// AFP of the block at `block.index - 1` (ignored for index 0).
    #[serde(rename = "previousBlockAfp", default)]
    pub previous_block_afp: AggregatedFinalizationProof,
}

/// `get_finalization_proof` response: one signed vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFinalizationProofResponse {
    /// The voting peer.
    pub voter: String,
    /// Base64 signature over `prevBlockHash:blockId:blockHash:epochFullId`.
    #[serde(rename = "finalizationProof")]
    pub finalization_proof: String,
    /// Hash the peer voted for; must match the hunted block hash.
    #[serde(rename = "votedForHash")]
    pub voted_for_hash: String,
}

/// `get_anchor_block_with_afp` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsBlockWithAfpRequest {
    /// Route discriminator.
    pub route: String,
    /// Canonical block id to fetch.
    #[serde(rename = "blockID")]
    pub block_id: String,
}

/// `get_anchor_block_with_afp` response. The AFP belongs to the *next* block:
/// that is what proves the requested block is approved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsBlockWithAfpResponse {
    /// The stored block, if present.
    pub block: Option<Block>,
    /// AFP of the next block, if present.
    pub afp: Option<AggregatedFinalizationProof>,
}

/// `get_voting_stat` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsVotingStatRequest {
    /// Route discriminator.
    pub route: String,
    /// Epoch to read from.
    #[serde(rename = "epochIndex")]
    pub epoch_index: u64,
    /// Creator whose stat is requested.
    pub creator: String,
}

/// `get_voting_stat` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsVotingStatResponse {
    /// `"ok"` or `"error"`.
    pub status: String,
    /// Echoed epoch.
    #[serde(rename = "epochIndex")]
    pub epoch_index: u64,
    /// Echoed creator.
    pub creator: String,
    /// The persisted stat (template when nothing is persisted).
    #[serde(rename = "votingStat", default)]
    pub voting_stat: VotingStat,
    /// Error code when `status == "error"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload pushed to the Point of Distribution for every finalized block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodBlockStoreRequest {
    /// Route discriminator (`accept_anchor_block_with_afp`).
    pub route: String,
    /// The finalized block.
    pub block: Block,
    /// The AFP that finalizes it.
    pub afp: AggregatedFinalizationProof,
}

/// ACK envelope returned by the Point of Distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodStatusResponse {
    /// `"OK"` on acceptance.
    #[serde(default)]
    pub status: String,
}

/// `POST /request_anchor_rotation_proof` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationProofRequest {
    /// Epoch of the rotation.
    #[serde(rename = "epochIndex")]
    pub epoch_index: u64,
    /// The stalled creator.
    pub creator: String,
    /// The proposer's local voting stat for that creator.
    #[serde(default)]
    pub proposal: VotingStat,
}

/// `POST /request_anchor_rotation_proof` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationProofResponse {
    /// `"OK"`, `"UPGRADE"`, or `"ERROR"`.
    pub status: String,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Rotation signature when `status == "OK"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// The responder's fresher stat when `status == "UPGRADE"` (and echoed
    /// alongside `OK` so callers can detect divergent stats).
    #[serde(rename = "votingStat", default, skip_serializing_if = "Option::is_none")]
    pub voting_stat: Option<VotingStat>,
}

/// `POST /accept_aggregated_anchor_rotation_proof` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptRotationProofsRequest {
    /// The proofs to accept.
    #[serde(rename = "aggregatedAnchorRotationProofs", default)]
    pub aggregated_anchor_rotation_proofs: Vec<AggregatedAnchorRotationProof>,
}

/// `POST /accept_aggregated_leader_finalization_proof` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptLeaderFinalizationsRequest {
    /// The proofs to enqueue.
    #[serde(rename = "leaderFinalizations", default)]
    pub leader_finalizations: Vec<AggregatedLeaderFinalizationProof>,
}

/// Shared `{ "accepted": n }` response of the acceptance endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// Number of proofs accepted.
    pub accepted: usize,
}

/// One hop of the rotation chain returned by `/sequence_alignment_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceAlignmentAnchorData {
    /// The rotation proof that was embedded.
    pub aarp: AggregatedAnchorRotationProof,
    /// Index of the embedding block inside the including anchor's chain.
    #[serde(rename = "foundInBlock")]
    pub found_in_block: u64,
}

/// `/sequence_alignment_data` response: which later anchor includes rotation
/// proofs for every anchor between the requested one and itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceAlignmentDataResponse {
    /// Registry index of the including anchor.
    #[serde(rename = "foundInAnchorIndex")]
    pub found_in_anchor_index: usize,
    /// Rotated-anchor registry index to its embedded proof.
    pub anchors: BTreeMap<usize, SequenceAlignmentAnchorData>,
    /// AFP of the block after the deepest inclusion, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub afp: Option<AggregatedFinalizationProof>,
}

/// `/current_anchor_assumption` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentAnchorAssumptionResponse {
    /// Epoch the walk was evaluated against.
    #[serde(rename = "epochIndex")]
    pub epoch_index: u64,
    /// Registry index of the deepest rotation target reachable.
    #[serde(rename = "currentAnchorAssumption")]
    pub current_anchor_assumption: usize,
    /// Public key at that index.
    #[serde(rename = "anchorPubkey")]
    pub anchor_pubkey: String,
    /// The alignment data of the last hop, when any rotation happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<SequenceAlignmentDataResponse>,
}
