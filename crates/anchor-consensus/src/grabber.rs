//! The per-epoch finalization-proof grabber.
//!
//! A single task sweeps every resident epoch: load the next unfinalized
//! local block, broadcast it to the quorum, verify the returned votes, and
//! once a majority agrees persist the AFP and advance the pointer. The
//! state mutex is held only for snapshots and commits — never across
//! network I/O or store writes.

use crate::context::NodeContext;
use crate::runtime::{FinalizationRuntime, QuorumChannel};
use crate::verification::finalization_payload;
use anchor_types::block::{build_block_id, Block};
use anchor_types::epoch::EpochDataHandler;
use anchor_types::keys::{afp_key, pod_block_payload_id, proofs_grabber_key};
use anchor_types::proofs::{AggregatedFinalizationProof, ProofsGrabber};
use anchor_types::wire::{
    routes, PodBlockStoreRequest, WsFinalizationProofRequest, WsFinalizationProofResponse,
};
use std::sync::Arc;
use std::time::Duration;

const IDLE_BACKOFF: Duration = Duration::from_millis(200);
const BUSY_BACKOFF: Duration = Duration::from_millis(5);
const HUNT_DEADLINE: Duration = Duration::from_secs(3);

/// Runs forever; spawn as a task.
pub async fn run(ctx: Arc<NodeContext>) {
    loop {
        let handlers = ctx.epoch_handlers().await;
        let mut progressed = false;

        for handler in &handlers {
            let runtime = ctx
                .finalization
                .ensure(handler, &ctx.stores.finalization_voting_stats, ctx.as_ref())
                .await;
            progressed |= grab_once(&ctx, handler, &runtime).await;
        }

        tokio::time::sleep(if progressed { BUSY_BACKOFF } else { IDLE_BACKOFF }).await;
    }
}

/// One grabbing pass for one epoch. Returns whether the pointer advanced.
async fn grab_once(
    ctx: &Arc<NodeContext>,
    handler: &EpochDataHandler,
    runtime: &Arc<FinalizationRuntime>,
) -> bool {
    let full_id = handler.full_id();
    let majority = handler.majority();

    // Snapshot the pointer.
    let (hunt_index, hunting_id, cached_block, accepted_hash, afp_for_previous, cache_len) = {
        let state = runtime.state.lock();
        let hunt_index = state.grabber.accepted_index + 1;
        let hunting_id = build_block_id(handler.id, ctx.own_pubkey(), hunt_index as u64);
        let cached = state
            .block_to_share
            .clone()
            .filter(|block| block.id(handler.id) == hunting_id);
        (
            hunt_index,
            hunting_id,
            cached,
            state.grabber.accepted_hash.clone(),
            state.grabber.afp_for_previous.clone(),
            state.proofs_cache.len(),
        )
    };

    // The generator may simply not have produced this block yet.
    let block = match cached_block {
        Some(block) => block,
        None => match ctx.stores.blocks.get_json::<Block>(&hunting_id) {
            Ok(Some(block)) => block,
            _ => return false,
        },
    };
    let block_hash = block.hash(ctx.network_id());

    {
        let mut state = runtime.state.lock();
        if state.grabber.accepted_index + 1 != hunt_index {
            return false;
        }
        state.block_to_share = Some(block.clone());
        state.grabber.hunting_for_block_id = hunting_id.clone();
        state.grabber.hunting_for_block_hash = block_hash.clone();
    }

    let vote_payload = finalization_payload(&accepted_hash, &hunting_id, &block_hash, &full_id);

    if cache_len < majority {
        let request = WsFinalizationProofRequest {
            route: routes::GET_FINALIZATION_PROOF.to_string(),
            block: block.clone(),
            previous_block_afp: afp_for_previous,
        };
        let Ok(message) = serde_json::to_string(&request) else {
            return false;
        };

        let responses = {
            let mut channel = runtime.channel.lock().await;
            channel
                .connections
                .ensure_quorum(&handler.quorum, ctx.as_ref())
                .await;
            let QuorumChannel {
                connections,
                waiter,
            } = &mut *channel;
            waiter
                .send_and_wait(
                    &message,
                    &handler.quorum,
                    connections,
                    majority,
                    HUNT_DEADLINE,
                    ctx.as_ref(),
                )
                .await
        };

        if let Some(responses) = responses {
            // Verify outside any lock; malformed or foreign replies vanish.
            let mut valid: Vec<(String, String)> = Vec::new();
            for raw in responses.values() {
                let Ok(reply) = serde_json::from_slice::<WsFinalizationProofResponse>(raw) else {
                    continue;
                };
                if reply.voted_for_hash != block_hash {
                    continue;
                }
                if !handler.quorum.contains(&reply.voter) {
                    continue;
                }
                if !anchor_crypto::verify_signature(
                    &vote_payload,
                    &reply.voter,
                    &reply.finalization_proof,
                ) {
                    continue;
                }
                valid.push((reply.voter, reply.finalization_proof));
            }

            let mut state = runtime.state.lock();
            if state.grabber.accepted_index + 1 != hunt_index {
                return false;
            }
            for (voter, signature) in valid {
                state.proofs_cache.insert(voter, signature);
            }
        }
    }

    // Majority reached (now or from an earlier pass): assemble and commit.
    let afp = {
        let state = runtime.state.lock();
        if state.grabber.accepted_index + 1 != hunt_index || state.proofs_cache.len() < majority {
            None
        } else {
            Some(AggregatedFinalizationProof {
                prev_block_hash: accepted_hash.clone(),
                block_id: hunting_id.clone(),
                block_hash: block_hash.clone(),
                proofs: state.proofs_cache.clone(),
            })
        }
    };
    let Some(afp) = afp else {
        return false;
    };

    // AFP first, pointer second: a crash in between re-hunts the same block,
    // which is idempotent, while the reverse order would lose the proof.
    if let Err(e) = ctx.stores.epoch_data.put_json(&afp_key(&hunting_id), &afp) {
        tracing::warn!(target: "grabber", "failed to persist AFP for {hunting_id}: {e}");
        return false;
    }

    let advanced = ProofsGrabber {
        epoch_id: handler.id,
        accepted_index: hunt_index,
        accepted_hash: block_hash.clone(),
        afp_for_previous: afp.clone(),
        hunting_for_block_id: hunting_id.clone(),
        hunting_for_block_hash: block_hash.clone(),
    };
    if let Err(e) = ctx
        .stores
        .finalization_voting_stats
        .put_json(&proofs_grabber_key(handler.id), &advanced)
    {
        tracing::warn!(target: "grabber", "failed to persist grabber for epoch {}: {e}", handler.id);
        return false;
    }

    let agreements = {
        let mut state = runtime.state.lock();
        let count = state.proofs_cache.len();
        state.grabber = advanced;
        state.proofs_cache.clear();
        count
    };

    tracing::info!(
        target: "grabber",
        "approved height for epoch {} is {} (hash: {}...) ({:.3}% agreements)",
        handler.id,
        hunt_index,
        &block_hash[..8],
        agreements as f64 / handler.quorum.len().max(1) as f64 * 100.0
    );

    push_to_pod(ctx, handler.id, block, afp);
    true
}

/// Detached push of the finalized pair towards the Point of Distribution.
fn push_to_pod(
    ctx: &Arc<NodeContext>,
    epoch_id: u64,
    block: Block,
    afp: AggregatedFinalizationProof,
) {
    let id = pod_block_payload_id(epoch_id, &block.creator, block.index);
    let request = PodBlockStoreRequest {
        route: routes::ACCEPT_ANCHOR_BLOCK_WITH_AFP.to_string(),
        block,
        afp,
    };
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let Ok(payload) = serde_json::to_string(&request) else {
            return;
        };
        ctx.pod
            .send_with_outbox(&ctx.stores.finalization_voting_stats, &id, &payload)
            .await;
    });
}
