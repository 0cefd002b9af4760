//! Voting on candidate blocks from peer anchors.
//!
//! A vote is only produced after the candidate block, the AFP for its
//! predecessor, and the updated voting stat have all been persisted —
//! storage first, signature second, so a returned vote always refers to
//! state this node can serve back.

use anchor_consensus::context::NodeContext;
use anchor_consensus::verification::{
    finalization_payload, verify_aggregated_anchor_rotation_proof,
    verify_aggregated_finalization_proof,
};
use anchor_types::block::{build_block_id, Block};
use anchor_types::epoch::EpochDataHandler;
use anchor_types::keys::afp_key;
use anchor_types::proofs::VotingStat;
use anchor_types::wire::{WsFinalizationProofRequest, WsFinalizationProofResponse};
use std::sync::Arc;

/// `get_finalization_proof`: returns the signed vote, or `None` when the
/// request must be ignored (every rejection is silent by protocol).
pub async fn get_finalization_proof(
    ctx: &Arc<NodeContext>,
    request: WsFinalizationProofRequest,
) -> Option<String> {
    if !ctx.flood_allowed() {
        return None;
    }

    // The read guard is held for the whole decision: epoch rotation cannot
    // swap the window from under a vote in flight.
    let state = ctx.approvement.read().await;
    let epoch = state.find_by_full_id(&request.block.epoch)?;
    let epoch_index = epoch.id;
    let epoch_full_id = epoch.full_id();
    let creator = request.block.creator.clone();

    if !epoch.anchors_registry.contains(&creator) {
        return None;
    }
    if ctx.is_creator_disabled(epoch_index, &creator) {
        return None;
    }
    if ctx.epoch_finish_exists(epoch_index) {
        return None;
    }

    let local = ctx.read_voting_stat(epoch_index, &creator).ok()?;
    let block_hash = request.block.hash(ctx.network_id());
    let block_index = request.block.index as i64;

    // Same chain segment: strictly ahead of what we accepted, or exactly the
    // block we already accepted at that height.
    let same_segment = local.index < block_index
        || (local.index == block_index
            && block_hash == local.hash
            && request.block.epoch == epoch_full_id);
    if !same_segment {
        return None;
    }
    if !request.block.verify_signature(ctx.network_id()) {
        return None;
    }

    let lock = ctx.creator_locks.get(epoch_index, &creator);
    let _guard = lock.lock().await;

    let proposed_block_id = build_block_id(epoch_index, &creator, request.block.index);
    let previous_index = block_index - 1;
    let previous_block_id = format!("{epoch_index}:{creator}:{previous_index}");

    // Index 0 chains onto the zero seed and needs no previous AFP.
    if request.block.index != 0 {
        if previous_block_id != request.previous_block_afp.block_id {
            return None;
        }
        if !verify_aggregated_finalization_proof(&request.previous_block_afp, &epoch) {
            return None;
        }
    }

    let future_stat = if local.index == block_index {
        local
    } else {
        VotingStat {
            index: previous_index,
            hash: request.previous_block_afp.block_hash.clone(),
            afp: request.previous_block_afp.clone(),
        }
    };

    ctx.stores
        .blocks
        .put_json(&proposed_block_id, &request.block)
        .ok()?;
    if request.block.index != 0 {
        ctx.stores
            .epoch_data
            .put_json(
                &afp_key(&request.previous_block_afp.block_id),
                &request.previous_block_afp,
            )
            .ok()?;
    }
    ctx.store_voting_stat(epoch_index, &creator, &future_stat)
        .ok()?;

    let prev_block_hash = if request.block.index == 0 {
        anchor_crypto::ZERO_HASH.to_string()
    } else {
        request.previous_block_afp.block_hash.clone()
    };
    let payload = finalization_payload(
        &prev_block_hash,
        &proposed_block_id,
        &block_hash,
        &epoch_full_id,
    );
    let response = WsFinalizationProofResponse {
        voter: ctx.own_pubkey().to_string(),
        finalization_proof: ctx.keypair.sign(&payload),
        voted_for_hash: block_hash,
    };

    scan_embedded_rotation_proofs(ctx, epoch.clone(), request.block, proposed_block_id);

    serde_json::to_string(&response).ok()
}

/// Detached scan of the block's embedded AARPs: each valid proof marks its
/// target as under rotation and records that this block's creator included
/// it (the delivery loop's inclusion receipt).
fn scan_embedded_rotation_proofs(
    ctx: &Arc<NodeContext>,
    epoch: EpochDataHandler,
    block: Block,
    block_id: String,
) {
    if block.extra_data.rotation_proofs.is_empty() {
        return;
    }
    let ctx = ctx.clone();
    tokio::spawn(async move {
        for proof in &block.extra_data.rotation_proofs {
            if proof.epoch_index != epoch.id {
                continue;
            }
            if verify_aggregated_anchor_rotation_proof(proof, &epoch).is_err() {
                continue;
            }
            ctx.mark_disabled_by_rotation(epoch.id, &proof.anchor);
            if let Err(e) =
                ctx.store_rotation_presence(epoch.id, &block.creator, &proof.anchor, &block_id)
            {
                tracing::warn!(
                    target: "gateway",
                    "failed to record AARP presence for {} in {block_id}: {e}",
                    proof.anchor
                );
            }
        }
    });
}
