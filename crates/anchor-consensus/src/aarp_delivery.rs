//! AARP delivery: re-broadcast stored rotation proofs until every live peer
//! provably included them.
//!
//! For each stored proof `P` rotating anchor `X` and each receiver `Y`:
//! skip self; skip `Y` when it is itself under rotation (transitive stop);
//! skip once `AARP_PRESENCE:<epoch>:Y:X` shows inclusion. Everything else
//! gets a POST every tick — failures are simply retried on the next one.

use crate::context::NodeContext;
use crate::verification::verify_aggregated_anchor_rotation_proof;
use anchor_networking::http::{peer_endpoint, post_json};
use anchor_types::epoch::EpochDataHandler;
use anchor_types::keys::aarp_prefix;
use anchor_types::proofs::AggregatedAnchorRotationProof;
use anchor_types::wire::AcceptRotationProofsRequest;
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_secs(3);

/// Runs forever; spawn as a task.
pub async fn run(ctx: Arc<NodeContext>) {
    loop {
        tokio::time::sleep(TICK).await;
        for handler in ctx.epoch_handlers().await {
            deliver_for_epoch(&ctx, &handler).await;
        }
    }
}

fn stored_proofs_for_epoch(
    ctx: &NodeContext,
    handler: &EpochDataHandler,
) -> Vec<AggregatedAnchorRotationProof> {
    let entries = match ctx
        .stores
        .finalization_voting_stats
        .scan_prefix(&aarp_prefix(handler.id))
    {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(target: "delivery", epoch = handler.id, "AARP scan failed: {e}");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(_key, raw)| {
            serde_json::from_slice::<AggregatedAnchorRotationProof>(&raw).ok()
        })
        // A proof that no longer verifies must never be re-broadcast.
        .filter(|proof| verify_aggregated_anchor_rotation_proof(proof, handler).is_ok())
        .collect()
}

async fn deliver_for_epoch(ctx: &Arc<NodeContext>, handler: &EpochDataHandler) {
    let proofs = stored_proofs_for_epoch(ctx, handler);
    if proofs.is_empty() {
        return;
    }

    let receivers = ctx.quorum_members(handler);
    if receivers.is_empty() {
        return;
    }

    for proof in proofs {
        // Covers mempool loss across restarts: the next generated block
        // re-embeds the proof.
        ctx.mempool.add_rotation_proof(proof.clone());

        let rotated_anchor = proof.anchor.clone();
        let body = AcceptRotationProofsRequest {
            aggregated_anchor_rotation_proofs: vec![proof],
        };

        for receiver in &receivers {
            if receiver.pubkey.is_empty() || receiver.url.is_empty() {
                continue;
            }
            if receiver.pubkey.eq_ignore_ascii_case(ctx.own_pubkey()) {
                continue;
            }
            if ctx.is_disabled_by_rotation(handler.id, &receiver.pubkey) {
                continue;
            }
            if ctx
                .load_rotation_presence(handler.id, &receiver.pubkey, &rotated_anchor)
                .is_some()
            {
                continue;
            }

            let endpoint =
                peer_endpoint(&receiver.url, "accept_aggregated_anchor_rotation_proof");
            if let Err(e) = post_json(&ctx.http_client, &endpoint, &body).await {
                tracing::debug!(
                    target: "delivery",
                    peer = %receiver.pubkey,
                    "AARP delivery failed (will retry): {e}"
                );
            }
        }
    }
}
