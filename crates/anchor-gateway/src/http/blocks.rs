//! Readers for stored blocks and AFPs. Values are returned verbatim — they
//! are stored as the JSON the wire expects.

use crate::AppError;
use anchor_consensus::context::NodeContext;
use anchor_types::keys::afp_key;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

fn raw_json(body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// `GET /block/{id}` — the stored block, or 404.
pub async fn get_block(
    State(ctx): State<Arc<NodeContext>>,
    Path(block_id): Path<String>,
) -> Result<Response, AppError> {
    match ctx.stores.blocks.get(&block_id) {
        Ok(Some(raw)) => Ok(raw_json(raw)),
        Ok(None) => Err(AppError::NotFound("Not found".into())),
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}

/// `GET /aggregated_finalization_proof/{blockId}` — the stored AFP, or 404.
pub async fn get_aggregated_finalization_proof(
    State(ctx): State<Arc<NodeContext>>,
    Path(block_id): Path<String>,
) -> Result<Response, AppError> {
    match ctx.stores.epoch_data.get(&afp_key(&block_id)) {
        Ok(Some(raw)) => Ok(raw_json(raw)),
        Ok(None) => Err(AppError::NotFound("Not found".into())),
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}
