//! HTTP route handlers, grouped by concern.

/// Rotation-chain readers (`/sequence_alignment_data`, `/current_anchor_assumption`).
pub mod alignment;
/// Stored-artifact readers (`/block/{id}`, `/aggregated_finalization_proof/{blockId}`).
pub mod blocks;
/// Rotation writers (`/request_anchor_rotation_proof` and the acceptance endpoints).
pub mod rotation;
