#![forbid(unsafe_code)]

//! # Anchor Types
//!
//! The foundational crate of the anchors-core workspace: every data
//! structure shared between the consensus core, the gateway, and the
//! networking plumbing lives here, together with the persistent key layout.
//!
//! As the base crate it depends only on `anchor-crypto` (for the Blake3
//! digests baked into block hashing and epoch derivation) and `serde`. All
//! wire and storage encodings are JSON with the field names fixed by the
//! network protocol, so structs here carry explicit `#[serde(rename)]`
//! attributes rather than a global casing convention.

/// Blocks, the extra-data payload union, and canonical block hashing.
pub mod block;
/// Node-level configuration (keypair, interfaces, extra data, PoD).
pub mod config;
/// Epoch handlers, network parameters, and the approvement-thread state.
pub mod epoch;
/// The immutable genesis record.
pub mod genesis;
/// Builders for every persistent key used across the four stores.
pub mod keys;
/// Finalization/rotation proofs and per-anchor voting stats.
pub mod proofs;
/// Request/response DTOs for the HTTP and websocket endpoints.
pub mod wire;
