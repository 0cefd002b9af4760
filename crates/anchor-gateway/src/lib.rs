#![forbid(unsafe_code)]

//! # Anchor Gateway
//!
//! The server side of the anchors node: the public HTTP API and the
//! peer-to-peer websocket endpoint. Handlers are pure state transitions over
//! the shared [`anchor_consensus::context::NodeContext`] — transport framing
//! stays here, decisions live in the handler bodies, verification lives in
//! `anchor-consensus`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use anchor_consensus::context::NodeContext;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// HTTP route handlers.
pub mod http;
/// Websocket upgrade and route dispatch.
pub mod ws;

#[cfg(test)]
mod tests;

/// Error envelope of the HTTP API: `{"err": "..."}` with a matching status.
#[derive(Debug)]
pub enum AppError {
    /// Malformed input; nothing was mutated.
    BadRequest(String),
    /// Unknown entity (block, AFP, epoch, creator).
    NotFound(String),
    /// The request conflicts with persisted state.
    Conflict(String),
    /// A store failure; the caller may retry.
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => {
                tracing::error!(target: "gateway", "internal error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({ "err": message }))).into_response()
    }
}

/// The public HTTP API router.
pub fn http_router(ctx: Arc<NodeContext>) -> Router {
    Router::new()
        .route("/block/:id", get(http::blocks::get_block))
        .route(
            "/aggregated_finalization_proof/:block_id",
            get(http::blocks::get_aggregated_finalization_proof),
        )
        .route(
            "/sequence_alignment_data/:epoch_index/:anchor_index",
            get(http::alignment::get_sequence_alignment_data),
        )
        .route(
            "/current_anchor_assumption",
            get(http::alignment::get_current_anchor_assumption),
        )
        .route(
            "/request_anchor_rotation_proof",
            post(http::rotation::request_anchor_rotation_proof),
        )
        .route(
            "/accept_aggregated_anchor_rotation_proof",
            post(http::rotation::accept_aggregated_anchor_rotation_proofs),
        )
        .route(
            "/accept_aggregated_leader_finalization_proof",
            post(http::rotation::accept_aggregated_leader_finalization_proofs),
        )
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// The peer-to-peer websocket router (a single upgrade endpoint; the JSON
/// envelope's `route` field selects the handler).
pub fn ws_router(ctx: Arc<NodeContext>) -> Router {
    Router::new()
        .route("/", get(ws::upgrade))
        .with_state(ctx)
}
