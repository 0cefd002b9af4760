//! The stalled-anchor health monitor.
//!
//! Every health-check interval the monitor compares each anchor's persisted
//! voting stat against the snapshot from the previous tick. Identical
//! snapshots mean no finalization progress; before disabling anyone the
//! monitor pulls voting stats from the quorum — a healthy network may simply
//! know more than this node. Only when the pull yields nothing fresher is
//! the anchor disabled, which makes it a rotation candidate.

use crate::context::NodeContext;
use crate::verification::validate_pulled_stat;
use anchor_types::epoch::EpochDataHandler;
use anchor_types::proofs::VotingStat;
use anchor_types::wire::{routes, WsVotingStatRequest, WsVotingStatResponse};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_INTERVAL_MS: u64 = 5_000;
const PULL_DEADLINE: Duration = Duration::from_secs(2);

/// Runs forever; spawn as a task.
pub async fn run(ctx: Arc<NodeContext>) {
    let mut interval_ms = ctx.genesis.network_parameters.health_check_interval_ms;
    if interval_ms == 0 {
        interval_ms = DEFAULT_INTERVAL_MS;
    }

    loop {
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        check_creators_health(&ctx).await;
    }
}

async fn check_creators_health(ctx: &Arc<NodeContext>) {
    let handlers = ctx.epoch_handlers().await;

    let mut total_creators = 0usize;
    let mut active_creators = 0usize;
    let mut stalled_creators = 0usize;

    for handler in &handlers {
        if handler.anchors_registry.is_empty() {
            continue;
        }
        total_creators += handler.anchors_registry.len();

        for creator in &handler.anchors_registry {
            if ctx.is_creator_disabled(handler.id, creator) {
                continue;
            }
            active_creators += 1;

            let stat = match ctx.read_voting_stat(handler.id, creator) {
                Ok(stat) => stat,
                Err(e) => {
                    tracing::warn!(
                        target: "health",
                        epoch = handler.id,
                        creator = %creator,
                        "failed to read voting stat: {e}"
                    );
                    continue;
                }
            };

            if evaluate_creator_progress(ctx, handler, creator, stat).await {
                stalled_creators += 1;
            }
        }
    }

    tracing::info!(
        target: "health",
        epochs = handlers.len(),
        total_creators,
        active_creators,
        stalled_creators,
        "health check sweep done"
    );
}

/// Returns whether the creator ended up disabled this tick.
async fn evaluate_creator_progress(
    ctx: &Arc<NodeContext>,
    handler: &EpochDataHandler,
    creator: &str,
    current: VotingStat,
) -> bool {
    let key = (handler.id, creator.to_string());

    let previous = ctx.health_snapshots.lock().get(&key).cloned();
    let progressing = match &previous {
        None => true,
        Some((index, hash)) => *index != current.index || *hash != current.hash,
    };
    if progressing {
        ctx.health_snapshots
            .lock()
            .insert(key, (current.index, current.hash));
        return false;
    }

    // No local progress since the last tick: ask the quorum before judging.
    if let Some(candidate) = pull_fresher_stat(ctx, handler, creator, &current).await {
        let lock = ctx.creator_locks.get(handler.id, creator);
        let _guard = lock.lock().await;

        // Re-read under the lock: never downgrade.
        let local = ctx
            .read_voting_stat(handler.id, creator)
            .unwrap_or_default();
        let fresh = if candidate.index > local.index {
            match ctx.store_voting_stat(handler.id, creator, &candidate) {
                Ok(()) => candidate,
                Err(e) => {
                    tracing::warn!(
                        target: "health",
                        epoch = handler.id,
                        creator = %creator,
                        "failed to store pulled stat: {e}"
                    );
                    local
                }
            }
        } else {
            local
        };
        ctx.health_snapshots
            .lock()
            .insert(key, (fresh.index, fresh.hash));
        return false;
    }

    match ctx.disable_creator(
        handler.id,
        creator,
        "no finalization progress between health checks",
    ) {
        Ok(()) => {
            tracing::warn!(
                target: "health",
                epoch = handler.id,
                creator = %creator,
                "creator disabled for finalization"
            );
        }
        Err(e) => {
            tracing::error!(
                target: "health",
                epoch = handler.id,
                creator = %creator,
                "failed to disable creator: {e}"
            );
        }
    }
    ctx.health_snapshots.lock().remove(&key);
    true
}

/// Broadcasts `get_voting_stat` to the quorum and returns the best candidate
/// that verifiably advances past `local`, if any.
async fn pull_fresher_stat(
    ctx: &Arc<NodeContext>,
    handler: &EpochDataHandler,
    creator: &str,
    local: &VotingStat,
) -> Option<VotingStat> {
    let request = WsVotingStatRequest {
        route: routes::GET_VOTING_STAT.to_string(),
        epoch_index: handler.id,
        creator: creator.to_string(),
    };
    let message = serde_json::to_string(&request).ok()?;

    let channel = ctx.health_channel(handler.id);
    let replies = {
        let channel = channel.lock().await;
        channel
            .connections
            .ensure_quorum(&handler.quorum, ctx.as_ref())
            .await;
        channel
            .connections
            .broadcast_collect(&handler.quorum, &message, PULL_DEADLINE)
            .await
    };

    let mut best: Option<VotingStat> = None;
    for (_peer, raw) in replies {
        let Ok(response) = serde_json::from_slice::<WsVotingStatResponse>(&raw) else {
            continue;
        };
        if !response.status.eq_ignore_ascii_case("ok") {
            continue;
        }
        let candidate = response.voting_stat;
        if candidate.index <= local.index {
            continue;
        }
        if !validate_pulled_stat(&candidate, handler.id, creator, handler) {
            continue;
        }
        if best.as_ref().map(|b| candidate.index > b.index).unwrap_or(true) {
            best = Some(candidate);
        }
    }
    best
}
