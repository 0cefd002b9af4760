//! The peer-to-peer websocket endpoint.
//!
//! Every message is one JSON envelope whose `route` field selects a handler.
//! Handlers return `Some(reply)` to answer or `None` to stay silent — a
//! rejected vote request is simply not answered, and the caller's read
//! deadline deals with it.

use anchor_consensus::context::NodeContext;
use anchor_types::wire::{
    routes, WsBlockWithAfpRequest, WsEnvelope, WsFinalizationProofRequest, WsVotingStatRequest,
};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use std::sync::Arc;

/// Votes on candidate blocks from peer anchors.
pub mod finalization;
/// Read-only lookups (stored blocks, voting stats).
pub mod queries;

/// `GET /` — upgrades to the websocket protocol.
pub async fn upgrade(State(ctx): State<Arc<NodeContext>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_connection(ctx, socket))
}

async fn serve_connection(ctx: Arc<NodeContext>, mut socket: WebSocket) {
    while let Some(Ok(frame)) = socket.recv().await {
        let Message::Text(text) = frame else {
            continue;
        };
        if let Some(reply) = dispatch(&ctx, &text).await {
            if socket.send(Message::Text(reply)).await.is_err() {
                return;
            }
        }
    }
}

/// Parses the envelope and routes to the matching handler.
pub async fn dispatch(ctx: &Arc<NodeContext>, raw: &str) -> Option<String> {
    let Ok(envelope) = serde_json::from_str::<WsEnvelope>(raw) else {
        return Some(r#"{"error":"invalid_json"}"#.to_string());
    };

    match envelope.route.as_str() {
        routes::GET_FINALIZATION_PROOF => {
            match serde_json::from_str::<WsFinalizationProofRequest>(raw) {
                Ok(request) => finalization::get_finalization_proof(ctx, request).await,
                Err(_) => Some(r#"{"error":"invalid_finalization_proof_request"}"#.to_string()),
            }
        }
        routes::GET_ANCHOR_BLOCK_WITH_AFP => {
            match serde_json::from_str::<WsBlockWithAfpRequest>(raw) {
                Ok(request) => queries::get_block_with_afp(ctx, &request),
                Err(_) => Some(r#"{"error":"invalid_block_with_afp_request"}"#.to_string()),
            }
        }
        routes::GET_VOTING_STAT => match serde_json::from_str::<WsVotingStatRequest>(raw) {
            Ok(request) => queries::get_voting_stat(ctx, request).await,
            Err(_) => Some(r#"{"error":"invalid_voting_stat_request"}"#.to_string()),
        },
        _ => Some(r#"{"error":"unknown_type"}"#.to_string()),
    }
}
