//! Typed read/write helpers over the persistent key layout.
//!
//! Thin wrappers so call sites talk in domain terms (voting stats, rotation
//! proofs, health flags) rather than in key strings. Reads fall back to the
//! template value where the protocol defines one.

use crate::context::NodeContext;
use crate::now_ms;
use anchor_storage::StorageError;
use anchor_types::keys::{
    aarp_disabled_key, aarp_key, aarp_presence_key, creator_health_key, epoch_finish_key,
    voting_stat_key,
};
use anchor_types::proofs::{
    AggregatedAnchorRotationProof, BlockCreatorHealthStatus, VotingStat,
};

impl NodeContext {
    /// The persisted voting stat of `(epoch, creator)`, or the template.
    pub fn read_voting_stat(
        &self,
        epoch_id: u64,
        creator: &str,
    ) -> Result<VotingStat, StorageError> {
        Ok(self
            .stores
            .finalization_voting_stats
            .get_json::<VotingStat>(&voting_stat_key(epoch_id, creator))?
            .unwrap_or_default())
    }

    /// Persists a voting stat.
    pub fn store_voting_stat(
        &self,
        epoch_id: u64,
        creator: &str,
        stat: &VotingStat,
    ) -> Result<(), StorageError> {
        self.stores
            .finalization_voting_stats
            .put_json(&voting_stat_key(epoch_id, creator), stat)
    }

    /// The stored rotation proof for `(epoch, anchor)`, if any.
    pub fn load_rotation_proof(
        &self,
        epoch_id: u64,
        anchor: &str,
    ) -> Result<Option<AggregatedAnchorRotationProof>, StorageError> {
        self.stores
            .finalization_voting_stats
            .get_json(&aarp_key(epoch_id, anchor))
    }

    /// Whether a rotation proof is stored for `(epoch, anchor)`.
    pub fn has_rotation_proof(&self, epoch_id: u64, anchor: &str) -> bool {
        self.stores
            .finalization_voting_stats
            .contains(&aarp_key(epoch_id, anchor))
            .unwrap_or(false)
    }

    /// Persists a rotation proof under `AARP:<epoch>:<anchor>`.
    pub fn store_rotation_proof(
        &self,
        proof: &AggregatedAnchorRotationProof,
    ) -> Result<(), StorageError> {
        self.stores
            .finalization_voting_stats
            .put_json(&aarp_key(proof.epoch_index, &proof.anchor), proof)
    }

    /// The block id in which `block_creator` included the AARP rotating
    /// `rotated_anchor`, if observed.
    pub fn load_rotation_presence(
        &self,
        epoch_id: u64,
        block_creator: &str,
        rotated_anchor: &str,
    ) -> Option<String> {
        self.stores
            .finalization_voting_stats
            .get(&aarp_presence_key(epoch_id, block_creator, rotated_anchor))
            .ok()
            .flatten()
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }

    /// Records that `block_creator` embedded the AARP rotating
    /// `rotated_anchor` in `block_id`.
    pub fn store_rotation_presence(
        &self,
        epoch_id: u64,
        block_creator: &str,
        rotated_anchor: &str,
        block_id: &str,
    ) -> Result<(), StorageError> {
        self.stores.finalization_voting_stats.put(
            &aarp_presence_key(epoch_id, block_creator, rotated_anchor),
            block_id.as_bytes(),
        )
    }

    /// Marks `receiver` as targeted by a valid AARP: deliveries to it stop.
    pub fn mark_disabled_by_rotation(&self, epoch_id: u64, receiver: &str) {
        if receiver.is_empty() {
            return;
        }
        if let Err(e) = self
            .stores
            .finalization_voting_stats
            .put(&aarp_disabled_key(epoch_id, receiver), b"1")
        {
            tracing::warn!(target: "rotation", "failed to mark {receiver} rotated in epoch {epoch_id}: {e}");
        }
    }

    /// Whether `receiver` is targeted by an observed AARP.
    pub fn is_disabled_by_rotation(&self, epoch_id: u64, receiver: &str) -> bool {
        !receiver.is_empty()
            && self
                .stores
                .finalization_voting_stats
                .contains(&aarp_disabled_key(epoch_id, receiver))
                .unwrap_or(false)
    }

    /// Disables finalization for a stalled creator, recording when and why.
    pub fn disable_creator(
        &self,
        epoch_id: u64,
        creator: &str,
        reason: &str,
    ) -> Result<(), StorageError> {
        let status = BlockCreatorHealthStatus {
            epoch: epoch_id,
            creator: creator.to_string(),
            disabled_at: now_ms(),
            reason: reason.to_string(),
        };
        self.stores
            .finalization_voting_stats
            .put_json(&creator_health_key(epoch_id, creator), &status)
    }

    /// Whether a creator is disabled for finalization in an epoch.
    pub fn is_creator_disabled(&self, epoch_id: u64, creator: &str) -> bool {
        self.stores
            .finalization_voting_stats
            .contains(&creator_health_key(epoch_id, creator))
            .unwrap_or(false)
    }

    /// Whether the epoch was closed locally (`EPOCH_FINISH:<id>` marker).
    pub fn epoch_finish_exists(&self, epoch_id: u64) -> bool {
        self.stores
            .finalization_voting_stats
            .contains(&epoch_finish_key(epoch_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use crate::bootstrap::load_or_seed_state;
    use crate::context::NodeContext;
    use anchor_storage::Stores;
    use anchor_types::config::NodeConfig;
    use anchor_types::epoch::NetworkParameters;
    use anchor_types::genesis::{AnchorStorage, Genesis};
    use anchor_types::proofs::{AggregatedAnchorRotationProof, VotingStat};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use std::sync::Arc;

    /// A context over temp stores with a real keypair and a 3-anchor genesis.
    pub(crate) fn test_context() -> (tempfile::TempDir, Arc<NodeContext>) {
        let dir = tempfile::tempdir().unwrap();
        let seed = [7u8; 32];
        let keypair = anchor_crypto::KeyPair::from_seed(seed);

        let genesis = Genesis {
            network_id: "testnet".into(),
            first_epoch_start_timestamp: 1_000,
            network_parameters: NetworkParameters {
                quorum_size: 3,
                epoch_duration: 60_000,
                block_time: 1_000,
                max_epochs_to_support: 2,
                health_check_interval_ms: 5_000,
            },
            anchors: vec![
                AnchorStorage {
                    pubkey: keypair.public_key().to_string(),
                    anchor_url: "http://self".into(),
                    wss_anchor_url: String::new(),
                },
                AnchorStorage {
                    pubkey: "peerB".into(),
                    anchor_url: "http://b".into(),
                    wss_anchor_url: String::new(),
                },
                AnchorStorage {
                    pubkey: "peerC".into(),
                    anchor_url: "http://c".into(),
                    wss_anchor_url: String::new(),
                },
            ],
        };
        let config = NodeConfig {
            public_key: keypair.public_key().to_string(),
            private_key: BASE64.encode(seed),
            extra_data_to_block: Default::default(),
            interface: "127.0.0.1".into(),
            port: 0,
            websocket_interface: "127.0.0.1".into(),
            websocket_port: 0,
            point_of_distribution_ws: None,
            chaindata_path: dir.path().join("chaindata").to_string_lossy().into_owned(),
        };

        let stores = Stores::open_all(&dir.path().join("chaindata")).unwrap();
        let state = load_or_seed_state(&stores, &genesis).unwrap();
        let ctx = NodeContext::new(config, genesis, stores, state).unwrap();
        (dir, ctx)
    }

    #[test]
    fn voting_stat_defaults_and_roundtrip() {
        let (_dir, ctx) = test_context();
        let template = ctx.read_voting_stat(0, "peerB").unwrap();
        assert_eq!(template.index, -1);

        let stat = VotingStat {
            index: 4,
            hash: "h4".into(),
            ..Default::default()
        };
        ctx.store_voting_stat(0, "peerB", &stat).unwrap();
        assert_eq!(ctx.read_voting_stat(0, "peerB").unwrap(), stat);
    }

    #[test]
    fn health_flags() {
        let (_dir, ctx) = test_context();
        assert!(!ctx.is_creator_disabled(0, "peerB"));
        ctx.disable_creator(0, "peerB", "stalled").unwrap();
        assert!(ctx.is_creator_disabled(0, "peerB"));
        // Different epoch, untouched.
        assert!(!ctx.is_creator_disabled(1, "peerB"));
    }

    #[test]
    fn rotation_proof_storage() {
        let (_dir, ctx) = test_context();
        assert!(!ctx.has_rotation_proof(0, "peerB"));
        let proof = AggregatedAnchorRotationProof {
            epoch_index: 0,
            anchor: "peerB".into(),
            voting_stat: VotingStat {
                index: 7,
                hash: "h7".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        ctx.store_rotation_proof(&proof).unwrap();
        assert!(ctx.has_rotation_proof(0, "peerB"));
        assert_eq!(ctx.load_rotation_proof(0, "peerB").unwrap(), Some(proof));
    }

    #[test]
    fn presence_and_rotation_disable_markers() {
        let (_dir, ctx) = test_context();
        assert!(ctx.load_rotation_presence(0, "peerB", "peerC").is_none());
        ctx.store_rotation_presence(0, "peerB", "peerC", "0:peerB:9")
            .unwrap();
        assert_eq!(
            ctx.load_rotation_presence(0, "peerB", "peerC").as_deref(),
            Some("0:peerB:9")
        );

        assert!(!ctx.is_disabled_by_rotation(0, "peerC"));
        ctx.mark_disabled_by_rotation(0, "peerC");
        assert!(ctx.is_disabled_by_rotation(0, "peerC"));
        assert!(!ctx.is_disabled_by_rotation(0, ""));
    }

    #[test]
    fn epoch_finish_marker() {
        let (_dir, ctx) = test_context();
        assert!(!ctx.epoch_finish_exists(0));
        ctx.stores
            .finalization_voting_stats
            .put(&anchor_types::keys::epoch_finish_key(0), b"TRUE")
            .unwrap();
        assert!(ctx.epoch_finish_exists(0));
    }
}
