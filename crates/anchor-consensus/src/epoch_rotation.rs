//! The epoch rotation loop.
//!
//! Polls every 200 ms. While the current epoch is fresh nothing happens;
//! once it expires the loop flips the flood gate off, takes the write lock,
//! deterministically seeds the next epoch, evicts the oldest one past the
//! window (with the full cleanup cascade), persists the state, and reopens
//! the gate.

use crate::context::NodeContext;
use crate::now_ms;
use anchor_types::keys::{epoch_finish_key, epoch_handler_key, generation_metadata_key, AT_KEY};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Unrecoverable store failure: the state on disk may be ahead of memory,
/// so the only safe move is to stop and let the operator restart.
fn fatal(message: &str) -> ! {
    tracing::error!(target: "epoch", "{message}");
    std::process::exit(1);
}

/// Runs forever; spawn as a task.
pub async fn run(ctx: Arc<NodeContext>) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let (current, params) = {
            let state = ctx.approvement.read().await;
            (
                state.current_epoch().cloned(),
                state.network_parameters.clone(),
            )
        };
        let Some(current) = current else {
            continue;
        };
        if current.hash.is_empty() || current.is_fresh(&params, now_ms()) {
            continue;
        }

        // Reject new read handlers while the writer waits for the lock,
        // otherwise a flood of readers can starve the rotation.
        ctx.set_flood_gate(false);
        rotate_once(&ctx).await;
        ctx.set_flood_gate(true);
    }
}

async fn rotate_once(ctx: &Arc<NodeContext>) {
    let mut state = ctx.approvement.write().await;

    let Some(latest) = state.supported_epochs.last().cloned() else {
        return;
    };
    if latest.is_fresh(&state.network_parameters, now_ms()) {
        // Another pass rotated while this one waited for the write lock.
        return;
    }

    let next = latest.derive_next(&state.network_parameters);
    state.supported_epochs.push(next.clone());

    if let Err(e) = ctx
        .stores
        .epoch_data
        .put_json(&epoch_handler_key(next.id), &next)
    {
        tracing::error!(target: "epoch", "failed to publish epoch handler {}: {e}", next.id);
    }

    if state.supported_epochs.len() > state.network_parameters.max_epochs_to_support {
        let dropped = state.supported_epochs.remove(0);
        evict_epoch(ctx, &dropped).await;
    }

    if let Err(e) = ctx
        .stores
        .approvement_thread_metadata
        .put_json(AT_KEY, &*state)
    {
        fatal(&format!("failed to persist approvement thread state: {e}"));
    }

    tracing::info!(target: "epoch", "epoch was updated => {}#{}", next.hash, next.id);
}

/// The eviction cascade: finish marker, runtimes, pointers, mempools, locks,
/// health state. After this, no cached per-epoch structure survives.
async fn evict_epoch(ctx: &Arc<NodeContext>, dropped: &anchor_types::epoch::EpochDataHandler) {
    if let Err(e) = ctx
        .stores
        .finalization_voting_stats
        .put(&epoch_finish_key(dropped.id), b"TRUE")
    {
        fatal(&format!("failed to mark epoch {} as finished: {e}", dropped.id));
    }

    if let Some(runtime) = ctx.finalization.remove(dropped.id) {
        runtime.channel.lock().await.connections.close_all().await;
    }

    let full_id = dropped.full_id();
    ctx.generation.lock().remove(&full_id);
    ctx.mempool.remove_epoch(dropped.id);
    ctx.creator_locks.remove_epoch(dropped.id);
    ctx.remove_health_epoch(dropped.id).await;

    if let Err(e) = ctx.stores.blocks.delete(&generation_metadata_key(&full_id)) {
        tracing::warn!(target: "epoch", "failed to delete generation pointer for {full_id}: {e}");
    }

    tracing::info!(target: "epoch", "evicted epoch {}", dropped.id);
}
