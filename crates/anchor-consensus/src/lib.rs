#![forbid(unsafe_code)]

//! # Anchor Consensus
//!
//! The concurrent finalization and rotation core of one anchor node: a set
//! of long-running tasks cooperating over the shared persistent stores.
//!
//! - the **epoch rotation loop** seeds and rotates the sliding window of
//!   supported epochs,
//! - the **block generator** mints locally signed blocks, bounded by
//!   finalization progress,
//! - the **proofs grabber** hunts finalization votes for the next local
//!   block and persists AFPs,
//! - the **health monitor** detects stalled anchors (pulling fresher stats
//!   from peers before disabling anyone),
//! - the **rotation collector** turns disabled anchors into AARPs,
//! - the **AARP delivery loop** re-broadcasts stored AARPs until every live
//!   peer provably included them.
//!
//! Tasks communicate only through the stores, the per-epoch mempools, and
//! the epoch registry inside [`context::NodeContext`]; there is no global
//! mutable state beyond that injected context.

/// AARP re-broadcast until inclusion.
pub mod aarp_delivery;
/// Startup: seed or reload the approvement-thread state and pointers.
pub mod bootstrap;
/// The dependency-injected process context shared by every task.
pub mod context;
/// The epoch rotation loop and the eviction cascade.
pub mod epoch_rotation;
/// The local block generator.
pub mod generation;
/// The per-epoch finalization-proof grabber.
pub mod grabber;
/// The stalled-anchor health monitor.
pub mod health;
/// Per-(epoch, creator) async mutex registry.
pub mod locks;
/// Per-epoch mempools for rotation and leader-finalization proofs.
pub mod mempool;
/// Typed read/write helpers over the persistent key layout.
pub mod records;
/// The rotation-proof collector.
pub mod rotation;
/// Per-epoch finalization runtimes (grabber state + websocket channel).
pub mod runtime;
/// AFP/AARP/proposal verification and signing payloads.
pub mod verification;

/// Current UTC wall clock in ms since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
