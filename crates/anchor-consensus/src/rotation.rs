//! The rotation-proof collector.
//!
//! Every 5 seconds: for each disabled anchor without a stored AARP, ask the
//! quorum to sign the rotation payload over the local voting stat. Peers
//! either sign (`OK`), or answer `UPGRADE` with a fresher stat — in which
//! case the round aborts, the stat is upgraded, and the next tick retries
//! from the new position. A majority of valid signatures becomes an AARP
//! that is persisted, mempooled, and broadcast.

use crate::context::{NodeContext, QuorumMember};
use crate::verification::{rotation_payload, validate_pulled_stat};
use anchor_networking::http::{peer_endpoint, post_json};
use anchor_types::epoch::EpochDataHandler;
use anchor_types::proofs::{AggregatedAnchorRotationProof, VotingStat};
use anchor_types::wire::{AcceptRotationProofsRequest, RotationProofRequest, RotationProofResponse};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_secs(5);

/// Runs forever; spawn as a task.
pub async fn run(ctx: Arc<NodeContext>) {
    loop {
        tokio::time::sleep(TICK).await;
        collect_rotation_proofs(&ctx).await;
    }
}

async fn collect_rotation_proofs(ctx: &Arc<NodeContext>) {
    let handlers = ctx.epoch_handlers().await;

    let mut total_creators = 0usize;
    let mut rotation_candidates = 0usize;
    let mut proofs_collected = 0usize;

    for handler in &handlers {
        if handler.anchors_registry.is_empty() {
            continue;
        }
        total_creators += handler.anchors_registry.len();
        for creator in &handler.anchors_registry {
            let (candidate, collected) = process_creator(ctx, handler, creator).await;
            if candidate {
                rotation_candidates += 1;
            }
            if collected {
                proofs_collected += 1;
            }
        }
    }

    tracing::info!(
        target: "rotation",
        epochs = handlers.len(),
        total_creators,
        rotation_candidates,
        proofs_collected,
        "rotation sweep done"
    );
}

/// Returns `(was a rotation candidate, proof collected this tick)`.
async fn process_creator(
    ctx: &Arc<NodeContext>,
    handler: &EpochDataHandler,
    creator: &str,
) -> (bool, bool) {
    if !ctx.is_creator_disabled(handler.id, creator)
        || ctx.has_rotation_proof(handler.id, creator)
    {
        return (false, false);
    }

    let lock = ctx.creator_locks.get(handler.id, creator);
    let _guard = lock.lock().await;

    // Both conditions may have changed while waiting for the lock.
    if !ctx.is_creator_disabled(handler.id, creator)
        || ctx.has_rotation_proof(handler.id, creator)
    {
        return (false, false);
    }

    let stat = match ctx.read_voting_stat(handler.id, creator) {
        Ok(stat) => stat,
        Err(e) => {
            tracing::warn!(
                target: "rotation",
                epoch = handler.id,
                creator = %creator,
                "failed to read voting stat: {e}"
            );
            return (true, false);
        }
    };
    if stat.index < 0 || stat.hash.is_empty() {
        // Nothing finalized locally: there is no position to attest to yet.
        return (true, false);
    }

    let Some(signatures) = gather_signatures(ctx, handler, creator, &stat).await else {
        return (true, false);
    };
    if signatures.len() < handler.majority() {
        return (true, false);
    }

    let proof = AggregatedAnchorRotationProof {
        epoch_index: handler.id,
        anchor: creator.to_string(),
        voting_stat: stat,
        signatures,
    };
    if let Err(e) = ctx.store_rotation_proof(&proof) {
        tracing::warn!(
            target: "rotation",
            epoch = handler.id,
            creator = %creator,
            "failed to persist rotation proof: {e}"
        );
        return (true, false);
    }
    ctx.mempool.add_rotation_proof(proof.clone());
    broadcast_rotation_proof(ctx, handler, proof).await;

    tracing::info!(
        target: "rotation",
        epoch = handler.id,
        creator = %creator,
        "rotation proof collected"
    );
    (true, true)
}

/// Requests rotation signatures from every quorum peer in parallel.
/// Returns `None` when the round was aborted by an upgrade.
async fn gather_signatures(
    ctx: &Arc<NodeContext>,
    handler: &EpochDataHandler,
    creator: &str,
    stat: &VotingStat,
) -> Option<BTreeMap<String, String>> {
    let expected_payload = rotation_payload(creator, stat.index, &stat.hash, handler.id);
    let request = RotationProofRequest {
        epoch_index: handler.id,
        creator: creator.to_string(),
        proposal: stat.clone(),
    };

    let members: Vec<QuorumMember> = ctx
        .quorum_members(handler)
        .into_iter()
        .filter(|member| member.pubkey != ctx.own_pubkey() && !member.url.is_empty())
        .collect();

    let posts = members.iter().map(|member| {
        let endpoint = peer_endpoint(&member.url, "request_anchor_rotation_proof");
        let client = ctx.http_client.clone();
        let request = request.clone();
        async move {
            let result = post_json(&client, &endpoint, &request).await;
            (member.clone(), result)
        }
    });
    let results = futures::future::join_all(posts).await;

    let majority = handler.majority();
    let mut signatures: BTreeMap<String, String> = BTreeMap::new();

    for (member, result) in results {
        if signatures.len() >= majority {
            break;
        }
        let Ok((status, body)) = result else {
            continue;
        };
        let Ok(response) = serde_json::from_slice::<RotationProofResponse>(&body) else {
            continue;
        };

        match response.status.as_str() {
            "UPGRADE" => {
                if let Some(fresher) = response.voting_stat {
                    if fresher.index > stat.index
                        && validate_pulled_stat(&fresher, handler.id, creator, handler)
                    {
                        if let Err(e) = ctx.store_voting_stat(handler.id, creator, &fresher) {
                            tracing::warn!(
                                target: "rotation",
                                epoch = handler.id,
                                creator = %creator,
                                "failed to store upgraded stat: {e}"
                            );
                        }
                        return None;
                    }
                }
            }
            "OK" => {
                // A peer answering OK from a diverged, fresher stat means our
                // proposal is stale; upgrade and retry next tick.
                if let Some(peer_stat) = &response.voting_stat {
                    if peer_stat.index > stat.index {
                        if validate_pulled_stat(peer_stat, handler.id, creator, handler) {
                            if let Err(e) =
                                ctx.store_voting_stat(handler.id, creator, peer_stat)
                            {
                                tracing::warn!(
                                    target: "rotation",
                                    epoch = handler.id,
                                    creator = %creator,
                                    "failed to store fresher stat: {e}"
                                );
                            }
                            return None;
                        }
                        continue;
                    }
                }
                if status == 200 {
                    if let Some(signature) = response.signature {
                        if anchor_crypto::verify_signature(
                            &expected_payload,
                            &member.pubkey,
                            &signature,
                        ) {
                            signatures.insert(member.pubkey, signature);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Some(signatures)
}

async fn broadcast_rotation_proof(
    ctx: &Arc<NodeContext>,
    handler: &EpochDataHandler,
    proof: AggregatedAnchorRotationProof,
) {
    let body = AcceptRotationProofsRequest {
        aggregated_anchor_rotation_proofs: vec![proof],
    };
    for member in ctx.quorum_members(handler) {
        if member.pubkey == ctx.own_pubkey() || member.url.is_empty() {
            continue;
        }
        let endpoint = peer_endpoint(&member.url, "accept_aggregated_anchor_rotation_proof");
        if let Err(e) = post_json(&ctx.http_client, &endpoint, &body).await {
            tracing::debug!(
                target: "rotation",
                peer = %member.pubkey,
                "failed to broadcast rotation proof: {e}"
            );
        }
    }
}
