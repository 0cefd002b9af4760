//! Per-epoch mempools for the two proof kinds carried in block extra data.
//!
//! Pools are keyed by epoch to avoid cross-epoch mixing; within a pool,
//! proofs are deduplicated by `(epoch, subject, votingStat.index)` so a
//! re-broadcast never doubles an entry.

use anchor_types::proofs::{AggregatedAnchorRotationProof, AggregatedLeaderFinalizationProof};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct EpochPool {
    rotation: Mutex<HashMap<String, AggregatedAnchorRotationProof>>,
    leader: Mutex<HashMap<String, AggregatedLeaderFinalizationProof>>,
}

/// The process-wide mempool, sharded per epoch.
#[derive(Default)]
pub struct ProofMempool {
    pools: DashMap<u64, EpochPool>,
}

fn rotation_key(proof: &AggregatedAnchorRotationProof) -> String {
    format!(
        "{}:{}:{}",
        proof.epoch_index, proof.anchor, proof.voting_stat.index
    )
}

fn leader_key(proof: &AggregatedLeaderFinalizationProof) -> String {
    format!(
        "{}:{}:{}",
        proof.epoch_index, proof.leader, proof.voting_stat.index
    )
}

impl ProofMempool {
    /// An empty mempool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a rotation proof for inclusion in the next generated block.
    pub fn add_rotation_proof(&self, proof: AggregatedAnchorRotationProof) {
        let pool = self.pools.entry(proof.epoch_index).or_default();
        pool.rotation.lock().insert(rotation_key(&proof), proof);
    }

    /// Queues a leader finalization proof.
    pub fn add_leader_finalization_proof(&self, proof: AggregatedLeaderFinalizationProof) {
        let pool = self.pools.entry(proof.epoch_index).or_default();
        pool.leader.lock().insert(leader_key(&proof), proof);
    }

    /// Takes every queued rotation proof of one epoch, emptying the pool.
    pub fn drain_rotation_proofs(&self, epoch_id: u64) -> Vec<AggregatedAnchorRotationProof> {
        let Some(pool) = self.pools.get(&epoch_id) else {
            return Vec::new();
        };
        let result = pool.rotation.lock().drain().map(|(_, v)| v).collect();
        result
    }

    /// Takes every queued leader finalization proof of one epoch.
    pub fn drain_leader_finalization_proofs(
        &self,
        epoch_id: u64,
    ) -> Vec<AggregatedLeaderFinalizationProof> {
        let Some(pool) = self.pools.get(&epoch_id) else {
            return Vec::new();
        };
        let result = pool.leader.lock().drain().map(|(_, v)| v).collect();
        result
    }

    /// Drops the whole pool of one epoch. Called on epoch eviction.
    pub fn remove_epoch(&self, epoch_id: u64) {
        self.pools.remove(&epoch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_types::proofs::VotingStat;

    fn rotation_proof(epoch: u64, anchor: &str, index: i64) -> AggregatedAnchorRotationProof {
        AggregatedAnchorRotationProof {
            epoch_index: epoch,
            anchor: anchor.into(),
            voting_stat: VotingStat {
                index,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn drain_empties_the_pool() {
        let mempool = ProofMempool::new();
        mempool.add_rotation_proof(rotation_proof(1, "a", 3));
        mempool.add_rotation_proof(rotation_proof(1, "b", 5));

        let drained = mempool.drain_rotation_proofs(1);
        assert_eq!(drained.len(), 2);
        assert!(mempool.drain_rotation_proofs(1).is_empty());
    }

    #[test]
    fn duplicate_proofs_collapse() {
        let mempool = ProofMempool::new();
        mempool.add_rotation_proof(rotation_proof(1, "a", 3));
        mempool.add_rotation_proof(rotation_proof(1, "a", 3));
        assert_eq!(mempool.drain_rotation_proofs(1).len(), 1);
    }

    #[test]
    fn epochs_are_isolated() {
        let mempool = ProofMempool::new();
        mempool.add_rotation_proof(rotation_proof(1, "a", 3));
        mempool.add_rotation_proof(rotation_proof(2, "a", 3));
        assert_eq!(mempool.drain_rotation_proofs(1).len(), 1);
        assert_eq!(mempool.drain_rotation_proofs(2).len(), 1);
    }

    #[test]
    fn remove_epoch_discards_pending() {
        let mempool = ProofMempool::new();
        mempool.add_rotation_proof(rotation_proof(1, "a", 3));
        mempool.remove_epoch(1);
        assert!(mempool.drain_rotation_proofs(1).is_empty());
    }
}
