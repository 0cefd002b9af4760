//! Handler-level tests over a real context (temp stores, real keys).

use crate::http::alignment::compute_alignment;
use crate::http::rotation::{handle_rotation_proof_request, process_rotation_proof};
use crate::ws;
use anchor_consensus::bootstrap::load_or_seed_state;
use anchor_consensus::context::NodeContext;
use anchor_consensus::verification::{finalization_payload, rotation_payload};
use anchor_crypto::KeyPair;
use anchor_storage::Stores;
use anchor_types::block::{build_block_id, Block};
use anchor_types::config::NodeConfig;
use anchor_types::epoch::NetworkParameters;
use anchor_types::genesis::{AnchorStorage, Genesis};
use anchor_types::keys::afp_key;
use anchor_types::proofs::{
    AggregatedAnchorRotationProof, AggregatedFinalizationProof, VotingStat,
};
use anchor_types::wire::{
    RotationProofRequest, WsBlockWithAfpRequest, WsFinalizationProofRequest,
    WsFinalizationProofResponse, WsVotingStatRequest, WsVotingStatResponse,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;

struct Harness {
    _dir: tempfile::TempDir,
    ctx: Arc<NodeContext>,
    epoch0: anchor_types::epoch::EpochDataHandler,
    own: KeyPair,
    peer_b: KeyPair,
    peer_c: KeyPair,
}

impl Harness {
    fn quorum_keys(&self) -> [&KeyPair; 3] {
        [&self.own, &self.peer_b, &self.peer_c]
    }

    fn epoch(&self) -> anchor_types::epoch::EpochDataHandler {
        self.epoch0.clone()
    }

    fn signed_afp(
        &self,
        prev: &str,
        block_id: &str,
        block_hash: &str,
    ) -> AggregatedFinalizationProof {
        let payload = finalization_payload(prev, block_id, block_hash, &self.epoch().full_id());
        let mut afp = AggregatedFinalizationProof {
            prev_block_hash: prev.into(),
            block_id: block_id.into(),
            block_hash: block_hash.into(),
            ..Default::default()
        };
        for key in self.quorum_keys() {
            afp.proofs
                .insert(key.public_key().to_string(), key.sign(&payload));
        }
        afp
    }

    fn signed_aarp(&self, anchor: &KeyPair, index: i64, hash: &str) -> AggregatedAnchorRotationProof {
        let anchor_pk = anchor.public_key();
        let mut stat = VotingStat {
            index,
            hash: hash.into(),
            ..Default::default()
        };
        stat.afp.block_id = build_block_id(0, anchor_pk, index as u64);
        stat.afp.block_hash = hash.into();
        let payload = rotation_payload(anchor_pk, index, hash, 0);
        let mut proof = AggregatedAnchorRotationProof {
            epoch_index: 0,
            anchor: anchor_pk.into(),
            voting_stat: stat,
            ..Default::default()
        };
        for key in self.quorum_keys() {
            proof
                .signatures
                .insert(key.public_key().to_string(), key.sign(&payload));
        }
        proof
    }

    fn signed_block(&self, creator: &KeyPair, index: u64, prev_hash: &str) -> Block {
        let mut block = Block {
            creator: creator.public_key().to_string(),
            time: 1_700_000_000_000,
            epoch: self.epoch().full_id(),
            extra_data: Default::default(),
            index,
            prev_hash: prev_hash.into(),
            sig: String::new(),
        };
        block.sig = creator.sign(&block.hash(self.ctx.network_id()));
        block
    }
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let own = KeyPair::from_seed([7u8; 32]);
    let peer_b = KeyPair::from_seed([8u8; 32]);
    let peer_c = KeyPair::from_seed([9u8; 32]);

    let genesis = Genesis {
        network_id: "testnet".into(),
        first_epoch_start_timestamp: 1_000,
        network_parameters: NetworkParameters {
            quorum_size: 3,
            epoch_duration: u64::MAX / 2,
            block_time: 1_000,
            max_epochs_to_support: 2,
            health_check_interval_ms: 5_000,
        },
        anchors: vec![
            AnchorStorage {
                pubkey: own.public_key().to_string(),
                anchor_url: "http://self".into(),
                wss_anchor_url: String::new(),
            },
            AnchorStorage {
                pubkey: peer_b.public_key().to_string(),
                anchor_url: "http://b".into(),
                wss_anchor_url: String::new(),
            },
            AnchorStorage {
                pubkey: peer_c.public_key().to_string(),
                anchor_url: "http://c".into(),
                wss_anchor_url: String::new(),
            },
        ],
    };
    let config = NodeConfig {
        public_key: own.public_key().to_string(),
        private_key: BASE64.encode([7u8; 32]),
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
    let epoch0 = state.supported_epochs[0].clone();
    let ctx = NodeContext::new(config, genesis, stores, state).unwrap();
    ctx.set_flood_gate(true);

    Harness {
        _dir: dir,
        ctx,
        epoch0,
        own,
        peer_b,
        peer_c,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vote_for_genesis_block_is_signed_and_persisted() {
    let h = harness();
    let block = h.signed_block(&h.peer_b, 0, anchor_crypto::ZERO_HASH);
    let block_hash = block.hash("testnet");
    let block_id = build_block_id(0, h.peer_b.public_key(), 0);

    let request = WsFinalizationProofRequest {
        route: "get_finalization_proof".into(),
        block,
        previous_block_afp: Default::default(),
    };
    let reply = ws::finalization::get_finalization_proof(&h.ctx, request)
        .await
        .expect("vote expected");
    let vote: WsFinalizationProofResponse = serde_json::from_str(&reply).unwrap();

    assert_eq!(vote.voter, h.own.public_key());
    assert_eq!(vote.voted_for_hash, block_hash);

    let payload = finalization_payload(
        anchor_crypto::ZERO_HASH,
        &block_id,
        &block_hash,
        &h.epoch().full_id(),
    );
    assert!(anchor_crypto::verify_signature(
        &payload,
        h.own.public_key(),
        &vote.finalization_proof
    ));

    // The block was persisted before the vote was produced.
    assert!(h.ctx.stores.blocks.contains(&block_id).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vote_with_previous_afp_advances_voting_stat() {
    let h = harness();
    let creator = h.peer_b.public_key().to_string();

    let block0 = h.signed_block(&h.peer_b, 0, anchor_crypto::ZERO_HASH);
    let h0 = block0.hash("testnet");
    let block0_id = build_block_id(0, &creator, 0);
    let afp0 = h.signed_afp(anchor_crypto::ZERO_HASH, &block0_id, &h0);

    let block1 = h.signed_block(&h.peer_b, 1, &h0);
    let request = WsFinalizationProofRequest {
        route: "get_finalization_proof".into(),
        block: block1,
        previous_block_afp: afp0,
    };
    let reply = ws::finalization::get_finalization_proof(&h.ctx, request.clone()).await;
    assert!(reply.is_some());

    let stat = h.ctx.read_voting_stat(0, &creator).unwrap();
    assert_eq!(stat.index, 0);
    assert_eq!(stat.hash, h0);
    assert!(h
        .ctx
        .stores
        .epoch_data
        .contains(&afp_key(&block0_id))
        .unwrap());

    // Idempotence: re-posting the same request returns the same signature.
    let first: WsFinalizationProofResponse = serde_json::from_str(&reply.unwrap()).unwrap();
    let again = ws::finalization::get_finalization_proof(&h.ctx, request)
        .await
        .expect("second vote expected");
    let second: WsFinalizationProofResponse = serde_json::from_str(&again).unwrap();
    assert_eq!(first.finalization_proof, second.finalization_proof);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_or_foreign_vote_requests_are_silent() {
    let h = harness();
    let creator = h.peer_b.public_key().to_string();

    // Unknown epoch.
    let mut block = h.signed_block(&h.peer_b, 0, anchor_crypto::ZERO_HASH);
    block.epoch = "deadbeef#9".into();
    let request = WsFinalizationProofRequest {
        route: "get_finalization_proof".into(),
        block,
        previous_block_afp: Default::default(),
    };
    assert!(ws::finalization::get_finalization_proof(&h.ctx, request)
        .await
        .is_none());

    // Disabled creator.
    h.ctx.disable_creator(0, &creator, "test").unwrap();
    let request = WsFinalizationProofRequest {
        route: "get_finalization_proof".into(),
        block: h.signed_block(&h.peer_b, 0, anchor_crypto::ZERO_HASH),
        previous_block_afp: Default::default(),
    };
    assert!(ws::finalization::get_finalization_proof(&h.ctx, request)
        .await
        .is_none());

    // Behind the local stat (not the same chain segment).
    let stat = VotingStat {
        index: 5,
        hash: "h5".into(),
        ..Default::default()
    };
    let creator_c = h.peer_c.public_key().to_string();
    h.ctx.store_voting_stat(0, &creator_c, &stat).unwrap();
    let request = WsFinalizationProofRequest {
        route: "get_finalization_proof".into(),
        block: h.signed_block(&h.peer_c, 2, "whatever"),
        previous_block_afp: Default::default(),
    };
    assert!(ws::finalization::get_finalization_proof(&h.ctx, request)
        .await
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rotation_request_branches() {
    let h = harness();
    let creator = h.peer_b.public_key().to_string();

    // Unknown epoch.
    let request = RotationProofRequest {
        epoch_index: 42,
        creator: creator.clone(),
        proposal: Default::default(),
    };
    assert!(handle_rotation_proof_request(&h.ctx, request).await.is_err());

    // Healthy creator: conflict.
    let request = RotationProofRequest {
        epoch_index: 0,
        creator: creator.clone(),
        proposal: Default::default(),
    };
    assert!(handle_rotation_proof_request(&h.ctx, request).await.is_err());

    h.ctx.disable_creator(0, &creator, "test").unwrap();
    let local = VotingStat {
        index: 7,
        hash: "h7".into(),
        ..Default::default()
    };
    h.ctx.store_voting_stat(0, &creator, &local).unwrap();

    // Lagging proposal: UPGRADE with the local stat.
    let request = RotationProofRequest {
        epoch_index: 0,
        creator: creator.clone(),
        proposal: VotingStat {
            index: 3,
            hash: "h3".into(),
            ..Default::default()
        },
    };
    let (status, response) = handle_rotation_proof_request(&h.ctx, request).await.unwrap();
    assert_eq!(status, 409);
    assert_eq!(response.status, "UPGRADE");
    assert_eq!(response.voting_stat.unwrap().index, 7);

    // Matching proposal: signed.
    let request = RotationProofRequest {
        epoch_index: 0,
        creator: creator.clone(),
        proposal: local.clone(),
    };
    let (status, response) = handle_rotation_proof_request(&h.ctx, request).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(response.status, "OK");
    let signature = response.signature.unwrap();
    let payload = rotation_payload(&creator, 7, "h7", 0);
    assert!(anchor_crypto::verify_signature(
        &payload,
        h.own.public_key(),
        &signature
    ));

    // Advancing proposal with a valid AFP: adopted, then signed.
    let block_id = build_block_id(0, &creator, 9);
    let afp = h.signed_afp("h7", &block_id, "h9");
    let proposal = VotingStat {
        index: 9,
        hash: "h9".into(),
        afp,
    };
    let request = RotationProofRequest {
        epoch_index: 0,
        creator: creator.clone(),
        proposal: proposal.clone(),
    };
    let (status, response) = handle_rotation_proof_request(&h.ctx, request).await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(response.status, "OK");
    assert_eq!(h.ctx.read_voting_stat(0, &creator).unwrap().index, 9);

    // Advancing proposal with a broken AFP: ERROR, nothing stored.
    let request = RotationProofRequest {
        epoch_index: 0,
        creator: creator.clone(),
        proposal: VotingStat {
            index: 12,
            hash: "h12".into(),
            ..Default::default()
        },
    };
    let (status, response) = handle_rotation_proof_request(&h.ctx, request).await.unwrap();
    assert_eq!(status, 400);
    assert_eq!(response.status, "ERROR");
    assert_eq!(h.ctx.read_voting_stat(0, &creator).unwrap().index, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepting_rotation_proofs_is_idempotent_and_keeps_freshest() {
    let h = harness();

    let fresh = h.signed_aarp(&h.peer_b, 9, "h9");
    let stale = h.signed_aarp(&h.peer_b, 8, "h8");

    process_rotation_proof(&h.ctx, fresh.clone()).await.unwrap();
    assert!(h.ctx.is_disabled_by_rotation(0, h.peer_b.public_key()));

    // A staler proof is accepted but does not replace the stored one.
    process_rotation_proof(&h.ctx, stale).await.unwrap();
    let stored = h
        .ctx
        .load_rotation_proof(0, h.peer_b.public_key())
        .unwrap()
        .unwrap();
    assert_eq!(stored.voting_stat.index, 9);

    // Re-posting the same proof leaves state unchanged.
    process_rotation_proof(&h.ctx, fresh).await.unwrap();
    assert_eq!(
        h.ctx
            .load_rotation_proof(0, h.peer_b.public_key())
            .unwrap()
            .unwrap()
            .voting_stat
            .index,
        9
    );

    // A sub-majority proof is rejected outright.
    let mut thin = h.signed_aarp(&h.peer_c, 4, "h4");
    let keep: Vec<String> = thin.signatures.keys().take(1).cloned().collect();
    thin.signatures.retain(|k, _| keep.contains(k));
    assert!(process_rotation_proof(&h.ctx, thin).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn alignment_walk_follows_rotation_chain() {
    let h = harness();
    let registry = h.epoch().anchors_registry.clone();
    let rotated = h.peer_b.public_key().to_string();
    let includer = h.peer_c.public_key().to_string();

    // No data yet: nothing to align against.
    assert!(compute_alignment(&h.ctx, 0, &registry, 1).unwrap().is_none());

    let proof = h.signed_aarp(&h.peer_b, 7, "h7");
    h.ctx.store_rotation_proof(&proof).unwrap();
    h.ctx
        .store_rotation_presence(0, &includer, &rotated, &build_block_id(0, &includer, 4))
        .unwrap();

    let alignment = compute_alignment(&h.ctx, 0, &registry, 1).unwrap().unwrap();
    assert_eq!(alignment.found_in_anchor_index, 2);
    let hop = alignment.anchors.get(&1).unwrap();
    assert_eq!(hop.found_in_block, 4);
    assert_eq!(hop.aarp.voting_stat.index, 7);
    assert!(alignment.afp.is_none());

    // With the follow-up AFP stored, the response carries it.
    let afp = h.signed_afp("h4", &build_block_id(0, &includer, 5), "h5");
    h.ctx
        .stores
        .epoch_data
        .put_json(&afp_key(&build_block_id(0, &includer, 5)), &afp)
        .unwrap();
    let alignment = compute_alignment(&h.ctx, 0, &registry, 1).unwrap().unwrap();
    assert!(alignment.afp.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn voting_stat_query_reports_state_and_errors() {
    let h = harness();
    let creator = h.peer_b.public_key().to_string();
    let stat = VotingStat {
        index: 3,
        hash: "h3".into(),
        ..Default::default()
    };
    h.ctx.store_voting_stat(0, &creator, &stat).unwrap();

    let reply = ws::queries::get_voting_stat(
        &h.ctx,
        WsVotingStatRequest {
            route: "get_voting_stat".into(),
            epoch_index: 0,
            creator: creator.clone(),
        },
    )
    .await
    .unwrap();
    let response: WsVotingStatResponse = serde_json::from_str(&reply).unwrap();
    assert_eq!(response.status, "ok");
    assert_eq!(response.voting_stat.index, 3);

    let reply = ws::queries::get_voting_stat(
        &h.ctx,
        WsVotingStatRequest {
            route: "get_voting_stat".into(),
            epoch_index: 9,
            creator,
        },
    )
    .await
    .unwrap();
    let response: WsVotingStatResponse = serde_json::from_str(&reply).unwrap();
    assert_eq!(response.status, "error");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn block_with_afp_returns_successor_proof() {
    let h = harness();
    let creator = h.peer_b.public_key().to_string();
    let block = h.signed_block(&h.peer_b, 0, anchor_crypto::ZERO_HASH);
    let block_id = build_block_id(0, &creator, 0);
    h.ctx.stores.blocks.put_json(&block_id, &block).unwrap();

    // Without the successor AFP the block comes back alone.
    let reply = ws::queries::get_block_with_afp(
        &h.ctx,
        &WsBlockWithAfpRequest {
            route: "get_anchor_block_with_afp".into(),
            block_id: block_id.clone(),
        },
    )
    .unwrap();
    assert!(reply.contains(r#""afp":null"#));

    let next_id = build_block_id(0, &creator, 1);
    let afp = h.signed_afp(&block.hash("testnet"), &next_id, "h1");
    h.ctx
        .stores
        .epoch_data
        .put_json(&afp_key(&next_id), &afp)
        .unwrap();
    let reply = ws::queries::get_block_with_afp(
        &h.ctx,
        &WsBlockWithAfpRequest {
            route: "get_anchor_block_with_afp".into(),
            block_id,
        },
    )
    .unwrap();
    assert!(reply.contains(&next_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_rejects_malformed_envelopes() {
    let h = harness();
    assert_eq!(
        ws::dispatch(&h.ctx, "not json").await.as_deref(),
        Some(r#"{"error":"invalid_json"}"#)
    );
    assert_eq!(
        ws::dispatch(&h.ctx, r#"{"route":"nope"}"#).await.as_deref(),
        Some(r#"{"error":"unknown_type"}"#)
    );
    assert_eq!(
        ws::dispatch(&h.ctx, r#"{"route":"get_voting_stat","epochIndex":"x"}"#)
            .await
            .as_deref(),
        Some(r#"{"error":"invalid_voting_stat_request"}"#)
    );
}
