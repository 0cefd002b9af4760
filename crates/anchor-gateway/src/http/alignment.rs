//! Rotation-chain readers used by external consumers to resynchronize: which
//! later anchor has provably rotated a given one, and how deep the rotation
//! chain currently reaches.

use crate::AppError;
use anchor_consensus::context::NodeContext;
use anchor_types::block::{build_block_id, parse_block_id};
use anchor_types::keys::afp_key;
use anchor_types::proofs::AggregatedFinalizationProof;
use anchor_types::wire::{
    CurrentAnchorAssumptionResponse, SequenceAlignmentAnchorData, SequenceAlignmentDataResponse,
};
use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `GET /sequence_alignment_data/{epochIndex}/{anchorIndex}`.
pub async fn get_sequence_alignment_data(
    State(ctx): State<Arc<NodeContext>>,
    Path((epoch_index, anchor_index)): Path<(u64, usize)>,
) -> Result<Json<SequenceAlignmentDataResponse>, AppError> {
    let registry = {
        let state = ctx.approvement.read().await;
        state
            .current_epoch()
            .map(|epoch| epoch.anchors_registry.clone())
            .unwrap_or_default()
    };
    if registry.is_empty() {
        return Err(AppError::Internal("anchors registry is empty".into()));
    }
    if anchor_index + 1 >= registry.len() {
        return Err(AppError::BadRequest("anchorIndex out of range".into()));
    }

    match compute_alignment(&ctx, epoch_index, &registry, anchor_index)? {
        Some(response) => Ok(Json(response)),
        None => Err(AppError::NotFound("alignment data not found".into())),
    }
}

/// Walks the registry from `anchor_index + 1` looking for the first anchor
/// that has embedded rotation proofs for *every* anchor between the
/// requested one and itself (anchors skipped along the way must themselves
/// be rotated, hence the growing requirement set).
pub fn compute_alignment(
    ctx: &NodeContext,
    epoch_index: u64,
    registry: &[String],
    anchor_index: usize,
) -> Result<Option<SequenceAlignmentDataResponse>, AppError> {
    let index_of: BTreeMap<&str, usize> = registry
        .iter()
        .enumerate()
        .map(|(idx, pk)| (pk.as_str(), idx))
        .collect();

    let mut required: Vec<String> = vec![registry[anchor_index].clone()];

    for candidate_index in anchor_index + 1..registry.len() {
        let creator = &registry[candidate_index];
        let mut found: BTreeMap<usize, SequenceAlignmentAnchorData> = BTreeMap::new();
        let mut deepest_block: i64 = -1;
        let mut all_found = true;

        for rotated in &required {
            let Some(block_id) = ctx.load_rotation_presence(epoch_index, creator, rotated) else {
                all_found = false;
                break;
            };
            let Some((_, _, block_index)) = parse_block_id(&block_id) else {
                all_found = false;
                break;
            };
            let proof = ctx
                .load_rotation_proof(epoch_index, rotated)
                .map_err(|e| AppError::Internal(format!("failed to load AARP: {e}")))?;
            let Some(proof) = proof else {
                all_found = false;
                break;
            };
            let Some(rotated_index) = index_of.get(rotated.as_str()) else {
                all_found = false;
                break;
            };
            found.insert(
                *rotated_index,
                SequenceAlignmentAnchorData {
                    aarp: proof,
                    found_in_block: block_index,
                },
            );
            deepest_block = deepest_block.max(block_index as i64);
        }

        if all_found {
            let afp = load_afp(
                ctx,
                epoch_index,
                creator,
                (deepest_block + 1).max(0) as u64,
            );
            return Ok(Some(SequenceAlignmentDataResponse {
                found_in_anchor_index: candidate_index,
                anchors: found,
                afp,
            }));
        }
        required.push(creator.clone());
    }

    Ok(None)
}

fn load_afp(
    ctx: &NodeContext,
    epoch_index: u64,
    creator: &str,
    block_index: u64,
) -> Option<AggregatedFinalizationProof> {
    let block_id = build_block_id(epoch_index, creator, block_index);
    ctx.stores
        .epoch_data
        .get_json::<AggregatedFinalizationProof>(&afp_key(&block_id))
        .ok()
        .flatten()
}

/// Query parameters of `/current_anchor_assumption`.
#[derive(Debug, Deserialize)]
pub struct AssumptionQuery {
    /// Epoch to evaluate; defaults to the current one.
    #[serde(rename = "epochIndex")]
    pub epoch_index: Option<u64>,
}

/// `GET /current_anchor_assumption?epochIndex=` — follows the rotation chain
/// from registry index 0 to the deepest rotation target reachable.
pub async fn get_current_anchor_assumption(
    State(ctx): State<Arc<NodeContext>>,
    Query(query): Query<AssumptionQuery>,
) -> Result<Json<CurrentAnchorAssumptionResponse>, AppError> {
    let (current_epoch_id, registry) = {
        let state = ctx.approvement.read().await;
        match state.current_epoch() {
            Some(epoch) => (epoch.id, epoch.anchors_registry.clone()),
            None => (0, Vec::new()),
        }
    };
    if registry.is_empty() {
        return Err(AppError::Internal("anchors registry is empty".into()));
    }
    let epoch_index = query.epoch_index.unwrap_or(current_epoch_id);

    let mut assumption = 0usize;
    let mut last_proof: Option<SequenceAlignmentDataResponse> = None;

    loop {
        if assumption + 1 >= registry.len() {
            break;
        }
        let Some(step) = compute_alignment(&ctx, epoch_index, &registry, assumption)? else {
            break;
        };
        // Guard against a non-advancing or out-of-range walk.
        if step.found_in_anchor_index <= assumption
            || step.found_in_anchor_index >= registry.len()
        {
            break;
        }
        assumption = step.found_in_anchor_index;
        last_proof = Some(step);
    }

    Ok(Json(CurrentAnchorAssumptionResponse {
        epoch_index,
        current_anchor_assumption: assumption,
        anchor_pubkey: registry[assumption].clone(),
        proof: last_proof,
    }))
}
