//! Read-only websocket lookups.

use anchor_consensus::context::NodeContext;
use anchor_types::block::{build_block_id, parse_block_id, Block};
use anchor_types::keys::afp_key;
use anchor_types::proofs::AggregatedFinalizationProof;
use anchor_types::wire::{
    WsBlockWithAfpRequest, WsBlockWithAfpResponse, WsVotingStatRequest, WsVotingStatResponse,
};
use std::sync::Arc;

/// `get_anchor_block_with_afp`: the stored block plus the AFP of its
/// successor — which is what proves the requested block is approved.
pub fn get_block_with_afp(
    ctx: &Arc<NodeContext>,
    request: &WsBlockWithAfpRequest,
) -> Option<String> {
    let block = ctx
        .stores
        .blocks
        .get_json::<Block>(&request.block_id)
        .ok()
        .flatten()?;

    let afp = parse_block_id(&request.block_id).and_then(|(epoch, creator, index)| {
        let next_block_id = build_block_id(epoch, &creator, index + 1);
        ctx.stores
            .epoch_data
            .get_json::<AggregatedFinalizationProof>(&afp_key(&next_block_id))
            .ok()
            .flatten()
    });

    serde_json::to_string(&WsBlockWithAfpResponse {
        block: Some(block),
        afp,
    })
    .ok()
}

/// `get_voting_stat`: this node's persisted stat for `(epoch, creator)`.
pub async fn get_voting_stat(
    ctx: &Arc<NodeContext>,
    request: WsVotingStatRequest,
) -> Option<String> {
    if !ctx.flood_allowed() {
        return None;
    }

    let error = |code: &str| WsVotingStatResponse {
        status: "error".into(),
        epoch_index: request.epoch_index,
        creator: request.creator.clone(),
        voting_stat: Default::default(),
        error: Some(code.into()),
    };

    let response = match ctx.find_epoch_by_id(request.epoch_index).await {
        None => error("epoch_not_found"),
        Some(epoch) if !epoch.anchors_registry.contains(&request.creator) => {
            error("creator_not_found")
        }
        Some(_) => match ctx.read_voting_stat(request.epoch_index, &request.creator) {
            Ok(stat) => WsVotingStatResponse {
                status: "ok".into(),
                epoch_index: request.epoch_index,
                creator: request.creator.clone(),
                voting_stat: stat,
                error: None,
            },
            Err(_) => error("storage_error"),
        },
    };

    serde_json::to_string(&response).ok()
}
