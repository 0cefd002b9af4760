//! Rotation endpoints: signing rotation proposals for peers, and accepting
//! aggregated proofs (rotation and leader finalization) into local state.

use crate::AppError;
use anchor_consensus::context::NodeContext;
use anchor_consensus::verification::{
    rotation_payload, validate_upgrade_proposal, verify_aggregated_anchor_rotation_proof,
};
use anchor_types::epoch::EpochDataHandler;
use anchor_types::proofs::{AggregatedAnchorRotationProof, VotingStat};
use anchor_types::wire::{
    AcceptLeaderFinalizationsRequest, AcceptRotationProofsRequest, AcceptedResponse,
    RotationProofRequest, RotationProofResponse,
};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use std::sync::Arc;

/// `POST /request_anchor_rotation_proof`.
pub async fn request_anchor_rotation_proof(
    State(ctx): State<Arc<NodeContext>>,
    Json(request): Json<RotationProofRequest>,
) -> Result<Response, AppError> {
    let (status, response) = handle_rotation_proof_request(&ctx, request).await?;
    Ok((
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
        Json(response),
    )
        .into_response())
}

/// The decision core of `request_anchor_rotation_proof`; split from the
/// axum wrapper so the branches are directly testable.
pub async fn handle_rotation_proof_request(
    ctx: &Arc<NodeContext>,
    request: RotationProofRequest,
) -> Result<(u16, RotationProofResponse), AppError> {
    if request.creator.is_empty() {
        return Err(AppError::BadRequest("missing epochIndex or creator".into()));
    }
    let Some(epoch) = ctx.find_epoch_by_id(request.epoch_index).await else {
        return Err(AppError::NotFound("epoch not found".into()));
    };
    if !epoch.anchors_registry.contains(&request.creator) {
        return Err(AppError::NotFound("creator not found".into()));
    }

    let lock = ctx.creator_locks.get(epoch.id, &request.creator);
    let _guard = lock.lock().await;

    if !ctx.is_creator_disabled(epoch.id, &request.creator) {
        return Err(AppError::Conflict("creator is still healthy".into()));
    }

    let current = ctx
        .read_voting_stat(epoch.id, &request.creator)
        .map_err(|_| AppError::Internal("failed to read voting stats".into()))?;

    let proposal = request.proposal;
    if proposal.index < current.index {
        return Ok((
            409,
            RotationProofResponse {
                status: "UPGRADE".into(),
                message: Some("network progressed further".into()),
                signature: None,
                voting_stat: Some(current),
            },
        ));
    }

    if proposal.index == current.index {
        if current.index < 0 || current.hash.is_empty() {
            return Err(AppError::Conflict("no finalized blocks recorded".into()));
        }
        if !current.hash.eq_ignore_ascii_case(&proposal.hash) {
            return Err(AppError::Conflict("hash mismatch".into()));
        }
        return Ok((200, sign_rotation(ctx, &request.creator, current, &epoch)));
    }

    // The proposal is ahead of us: adopt it if it proves itself.
    if let Err(e) =
        validate_upgrade_proposal(&current, &proposal, epoch.id, &request.creator, &epoch)
    {
        return Ok((
            400,
            RotationProofResponse {
                status: "ERROR".into(),
                message: Some(e.to_string()),
                signature: None,
                voting_stat: None,
            },
        ));
    }
    ctx.store_voting_stat(epoch.id, &request.creator, &proposal)
        .map_err(|_| AppError::Internal("failed to persist voting stat".into()))?;
    Ok((200, sign_rotation(ctx, &request.creator, proposal, &epoch)))
}

fn sign_rotation(
    ctx: &NodeContext,
    anchor: &str,
    stat: VotingStat,
    epoch: &EpochDataHandler,
) -> RotationProofResponse {
    let payload = rotation_payload(anchor, stat.index, &stat.hash, epoch.id);
    RotationProofResponse {
        status: "OK".into(),
        message: None,
        signature: Some(ctx.keypair.sign(&payload)),
        voting_stat: Some(stat),
    }
}

/// `POST /accept_aggregated_anchor_rotation_proof`.
pub async fn accept_aggregated_anchor_rotation_proofs(
    State(ctx): State<Arc<NodeContext>>,
    Json(request): Json<AcceptRotationProofsRequest>,
) -> Result<Json<AcceptedResponse>, AppError> {
    if request.aggregated_anchor_rotation_proofs.is_empty() {
        return Err(AppError::BadRequest("missing rotation proofs".into()));
    }
    let mut accepted = 0;
    for proof in request.aggregated_anchor_rotation_proofs {
        process_rotation_proof(&ctx, proof)
            .await
            .map_err(AppError::BadRequest)?;
        accepted += 1;
    }
    Ok(Json(AcceptedResponse { accepted }))
}

/// Validates and persists one incoming AARP. Idempotent: an already stored
/// proof at the same or a higher index wins, so concurrent posts for the
/// same `(epoch, anchor)` converge on the freshest stat.
pub async fn process_rotation_proof(
    ctx: &Arc<NodeContext>,
    proof: AggregatedAnchorRotationProof,
) -> Result<(), String> {
    let Some(epoch) = ctx.find_epoch_by_id(proof.epoch_index).await else {
        return Err(format!("epoch {} is not tracked", proof.epoch_index));
    };
    if !epoch.anchors_registry.contains(&proof.anchor) {
        return Err(format!(
            "creator {} is not part of epoch {}",
            proof.anchor, proof.epoch_index
        ));
    }
    if proof.signatures.len() < epoch.majority() {
        return Err(format!(
            "insufficient signatures: {} < {}",
            proof.signatures.len(),
            epoch.majority()
        ));
    }
    verify_aggregated_anchor_rotation_proof(&proof, &epoch).map_err(|e| e.to_string())?;

    let lock = ctx.creator_locks.get(proof.epoch_index, &proof.anchor);
    let _guard = lock.lock().await;

    if let Ok(Some(existing)) = ctx.load_rotation_proof(proof.epoch_index, &proof.anchor) {
        if existing.voting_stat.index >= proof.voting_stat.index {
            ctx.mempool.add_rotation_proof(existing);
            return Ok(());
        }
    }

    ctx.store_rotation_proof(&proof)
        .map_err(|e| format!("store rotation proof: {e}"))?;
    // An anchor under rotation stops receiving deliveries (trigger #2 of the
    // delivery loop).
    ctx.mark_disabled_by_rotation(proof.epoch_index, &proof.anchor);
    ctx.mempool.add_rotation_proof(proof);
    Ok(())
}

/// `POST /accept_aggregated_leader_finalization_proof` — a thin drain into
/// the per-epoch mempool.
pub async fn accept_aggregated_leader_finalization_proofs(
    State(ctx): State<Arc<NodeContext>>,
    Json(request): Json<AcceptLeaderFinalizationsRequest>,
) -> Result<Json<AcceptedResponse>, AppError> {
    if request.leader_finalizations.is_empty() {
        return Err(AppError::BadRequest("missing leader finalizations".into()));
    }
    let mut accepted = 0;
    for proof in request.leader_finalizations {
        if proof.signatures.is_empty() {
            return Err(AppError::BadRequest("missing signatures".into()));
        }
        ctx.mempool.add_leader_finalization_proof(proof);
        accepted += 1;
    }
    Ok(Json(AcceptedResponse { accepted }))
}
