//! Signed-artifact verification and the canonical signing payloads.
//!
//! Two payload conventions exist on the network and must never be mixed:
//! finalization votes sign `prevBlockHash:blockId:blockHash:epochFullId`,
//! rotation votes sign `ANCHOR_ROTATION_PROOF:<anchor>:<index>:<hash>:<epochIndex>`.
//! The rotation payload is deliberately independent of AFP prev-hashes so it
//! stays stable while an anchor is being rotated.

use anchor_crypto::verify_signature;
use anchor_types::block::parse_block_id;
use anchor_types::epoch::EpochDataHandler;
use anchor_types::proofs::{AggregatedAnchorRotationProof, AggregatedFinalizationProof, VotingStat};
use std::collections::HashSet;
use thiserror::Error;

/// The payload a finalization vote signs.
pub fn finalization_payload(
    prev_block_hash: &str,
    block_id: &str,
    block_hash: &str,
    epoch_full_id: &str,
) -> String {
    format!("{prev_block_hash}:{block_id}:{block_hash}:{epoch_full_id}")
}

/// The payload a rotation vote signs.
pub fn rotation_payload(anchor: &str, index: i64, hash: &str, epoch_id: u64) -> String {
    format!("ANCHOR_ROTATION_PROOF:{anchor}:{index}:{hash}:{epoch_id}")
}

/// Counts signatures that verify over `payload` and belong to distinct
/// quorum members (pubkeys compared case-insensitively, each counted once).
fn count_quorum_signatures<'a>(
    payload: &str,
    signatures: impl Iterator<Item = (&'a String, &'a String)>,
    quorum: &[String],
) -> usize {
    let quorum_lower: HashSet<String> = quorum.iter().map(|pk| pk.to_lowercase()).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut ok = 0;
    for (pubkey, signature) in signatures {
        if signature.is_empty() || !verify_signature(payload, pubkey, signature) {
            continue;
        }
        let lowered = pubkey.to_lowercase();
        if quorum_lower.contains(&lowered) && seen.insert(lowered) {
            ok += 1;
        }
    }
    ok
}

/// Verifies an AFP against an epoch: at least a majority of distinct quorum
/// members signed `prevBlockHash:blockId:blockHash:epochFullId`.
pub fn verify_aggregated_finalization_proof(
    proof: &AggregatedFinalizationProof,
    epoch_handler: &EpochDataHandler,
) -> bool {
    let payload = finalization_payload(
        &proof.prev_block_hash,
        &proof.block_id,
        &proof.block_hash,
        &epoch_handler.full_id(),
    );
    count_quorum_signatures(&payload, proof.proofs.iter(), &epoch_handler.quorum)
        >= epoch_handler.majority()
}

/// Why an AARP failed verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotationProofError {
    /// The embedded voting stat is the empty template.
    #[error("invalid voting stat")]
    InvalidVotingStat,
    /// The embedded AFP has no block id.
    #[error("missing AFP blockId")]
    MissingAfpBlockId,
    /// The AFP block id does not name `(epoch, anchor, index)`.
    #[error("AFP blockId mismatch")]
    BlockIdMismatch,
    /// The voting stat hash differs from the AFP block hash.
    #[error("AFP block hash mismatch")]
    HashMismatch,
    /// Fewer than a majority of unique quorum members signed.
    #[error("verified signatures {got} < {need}")]
    InsufficientSignatures {
        /// Valid unique quorum signatures found.
        got: usize,
        /// The majority threshold.
        need: usize,
    },
}

/// Verifies an AARP against an epoch: the embedded stat must be internally
/// consistent, and a majority of unique quorum members must have signed the
/// rotation payload.
pub fn verify_aggregated_anchor_rotation_proof(
    proof: &AggregatedAnchorRotationProof,
    epoch_handler: &EpochDataHandler,
) -> Result<(), RotationProofError> {
    let stat = &proof.voting_stat;
    if stat.index < 0 || stat.hash.is_empty() {
        return Err(RotationProofError::InvalidVotingStat);
    }
    if stat.afp.block_id.is_empty() {
        return Err(RotationProofError::MissingAfpBlockId);
    }
    let expected_block_id = format!("{}:{}:{}", proof.epoch_index, proof.anchor, stat.index);
    if !stat.afp.block_id.eq_ignore_ascii_case(&expected_block_id) {
        return Err(RotationProofError::BlockIdMismatch);
    }
    if !stat.hash.eq_ignore_ascii_case(&stat.afp.block_hash) {
        return Err(RotationProofError::HashMismatch);
    }

    let payload = rotation_payload(&proof.anchor, stat.index, &stat.hash, proof.epoch_index);
    let got = count_quorum_signatures(&payload, proof.signatures.iter(), &epoch_handler.quorum);
    let need = epoch_handler.majority();
    if got < need {
        return Err(RotationProofError::InsufficientSignatures { got, need });
    }
    Ok(())
}

/// Why a rotation proposal was rejected by `request_anchor_rotation_proof`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProposalError {
    /// The proposal does not advance past the local stat.
    #[error("proposal index {proposed} does not advance current index {current}")]
    NotAdvancing {
        /// The proposed index.
        proposed: i64,
        /// The locally persisted index.
        current: i64,
    },
    /// The proposal hash does not match its AFP block hash.
    #[error("proposal hash does not match AFP block hash")]
    HashMismatch,
    /// The AFP block id is malformed.
    #[error("invalid AFP blockId")]
    InvalidBlockId,
    /// The AFP names a different epoch.
    #[error("AFP epoch mismatch")]
    EpochMismatch,
    /// The AFP names a different creator.
    #[error("AFP creator mismatch")]
    CreatorMismatch,
    /// The AFP names a different index.
    #[error("AFP index mismatch")]
    IndexMismatch,
    /// The AFP prev hash does not chain onto the local stat.
    #[error("AFP prev hash mismatch")]
    PrevHashMismatch,
    /// The AFP signatures do not verify.
    #[error("invalid aggregated finalization proof")]
    InvalidAfp,
}

/// Validates that `proposal` legitimately advances `current` for
/// `(epoch_index, creator)`: its AFP must name exactly that position, chain
/// onto the local hash, and carry a verifying signature majority.
pub fn validate_upgrade_proposal(
    current: &VotingStat,
    proposal: &VotingStat,
    epoch_index: u64,
    creator: &str,
    epoch_handler: &EpochDataHandler,
) -> Result<(), ProposalError> {
    if proposal.index <= current.index {
        return Err(ProposalError::NotAdvancing {
            proposed: proposal.index,
            current: current.index,
        });
    }
    check_stat_consistency(proposal, epoch_index, creator)?;
    if proposal.afp.prev_block_hash.is_empty()
        || !proposal
            .afp
            .prev_block_hash
            .eq_ignore_ascii_case(&current.hash)
    {
        return Err(ProposalError::PrevHashMismatch);
    }
    if !verify_aggregated_finalization_proof(&proposal.afp, epoch_handler) {
        return Err(ProposalError::InvalidAfp);
    }
    Ok(())
}

/// Validates a stat pulled from a peer (health monitor, rotation UPGRADE):
/// internal consistency plus a verifying AFP, without the prev-hash link —
/// the local chain segment may be arbitrarily far behind.
pub fn validate_pulled_stat(
    candidate: &VotingStat,
    epoch_index: u64,
    creator: &str,
    epoch_handler: &EpochDataHandler,
) -> bool {
    if candidate.index < 0 {
        return false;
    }
    if check_stat_consistency(candidate, epoch_index, creator).is_err() {
        return false;
    }
    verify_aggregated_finalization_proof(&candidate.afp, epoch_handler)
}

fn check_stat_consistency(
    stat: &VotingStat,
    epoch_index: u64,
    creator: &str,
) -> Result<(), ProposalError> {
    if stat.hash.is_empty() || !stat.hash.eq_ignore_ascii_case(&stat.afp.block_hash) {
        return Err(ProposalError::HashMismatch);
    }
    let Some((afp_epoch, afp_creator, afp_index)) = parse_block_id(&stat.afp.block_id) else {
        return Err(ProposalError::InvalidBlockId);
    };
    if afp_epoch != epoch_index {
        return Err(ProposalError::EpochMismatch);
    }
    if afp_creator != creator {
        return Err(ProposalError::CreatorMismatch);
    }
    if stat.index < 0 || afp_index != stat.index as u64 {
        return Err(ProposalError::IndexMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_crypto::KeyPair;

    fn keypair(tag: u8) -> KeyPair {
        KeyPair::from_seed([tag; 32])
    }

    fn epoch_with_quorum(keys: &[&KeyPair]) -> EpochDataHandler {
        let quorum: Vec<String> = keys.iter().map(|k| k.public_key().to_string()).collect();
        EpochDataHandler {
            id: 5,
            hash: anchor_crypto::hash_blake3("epoch-five"),
            anchors_registry: quorum.clone(),
            quorum,
            start_timestamp: 0,
        }
    }

    fn signed_afp(
        keys: &[&KeyPair],
        epoch: &EpochDataHandler,
        prev: &str,
        block_id: &str,
        block_hash: &str,
    ) -> AggregatedFinalizationProof {
        let payload = finalization_payload(prev, block_id, block_hash, &epoch.full_id());
        let mut afp = AggregatedFinalizationProof {
            prev_block_hash: prev.into(),
            block_id: block_id.into(),
            block_hash: block_hash.into(),
            ..Default::default()
        };
        for key in keys {
            afp.proofs
                .insert(key.public_key().to_string(), key.sign(&payload));
        }
        afp
    }

    #[test]
    fn afp_with_majority_verifies() {
        let (a, b, c, d) = (keypair(1), keypair(2), keypair(3), keypair(4));
        let epoch = epoch_with_quorum(&[&a, &b, &c, &d]);
        // majority of 4 is 3
        let afp = signed_afp(&[&a, &b, &c], &epoch, "prev", "5:pk:0", "h0");
        assert!(verify_aggregated_finalization_proof(&afp, &epoch));
    }

    #[test]
    fn afp_below_majority_fails() {
        let (a, b, c, d) = (keypair(1), keypair(2), keypair(3), keypair(4));
        let epoch = epoch_with_quorum(&[&a, &b, &c, &d]);
        let afp = signed_afp(&[&a, &b], &epoch, "prev", "5:pk:0", "h0");
        assert!(!verify_aggregated_finalization_proof(&afp, &epoch));
    }

    #[test]
    fn non_quorum_signers_never_count() {
        let (a, b, c, d) = (keypair(1), keypair(2), keypair(3), keypair(4));
        let outsider = keypair(9);
        let epoch = epoch_with_quorum(&[&a, &b, &c, &d]);
        // Two quorum members plus an outsider with a perfectly valid signature.
        let afp = signed_afp(&[&a, &b, &outsider], &epoch, "prev", "5:pk:0", "h0");
        assert!(!verify_aggregated_finalization_proof(&afp, &epoch));
    }

    #[test]
    fn wrong_epoch_invalidates_afp() {
        let (a, b, c) = (keypair(1), keypair(2), keypair(3));
        let epoch = epoch_with_quorum(&[&a, &b, &c]);
        let afp = signed_afp(&[&a, &b, &c], &epoch, "prev", "5:pk:0", "h0");
        let mut other = epoch.clone();
        other.hash = anchor_crypto::hash_blake3("different");
        assert!(!verify_aggregated_finalization_proof(&afp, &other));
    }

    fn rotation_proof(
        keys: &[&KeyPair],
        epoch: &EpochDataHandler,
        anchor: &str,
        index: i64,
        hash: &str,
    ) -> AggregatedAnchorRotationProof {
        let mut stat = VotingStat {
            index,
            hash: hash.into(),
            ..Default::default()
        };
        stat.afp.block_id = format!("{}:{anchor}:{index}", epoch.id);
        stat.afp.block_hash = hash.into();
        let payload = rotation_payload(anchor, index, hash, epoch.id);
        let mut proof = AggregatedAnchorRotationProof {
            epoch_index: epoch.id,
            anchor: anchor.into(),
            voting_stat: stat,
            ..Default::default()
        };
        for key in keys {
            proof
                .signatures
                .insert(key.public_key().to_string(), key.sign(&payload));
        }
        proof
    }

    #[test]
    fn aarp_with_majority_verifies() {
        let (a, b, c, d) = (keypair(1), keypair(2), keypair(3), keypair(4));
        let epoch = epoch_with_quorum(&[&a, &b, &c, &d]);
        let proof = rotation_proof(&[&a, &b, &c], &epoch, "stalled", 7, "h7");
        assert_eq!(
            verify_aggregated_anchor_rotation_proof(&proof, &epoch),
            Ok(())
        );
    }

    #[test]
    fn aarp_rejects_mismatched_block_id() {
        let (a, b, c, d) = (keypair(1), keypair(2), keypair(3), keypair(4));
        let epoch = epoch_with_quorum(&[&a, &b, &c, &d]);
        let mut proof = rotation_proof(&[&a, &b, &c], &epoch, "stalled", 7, "h7");
        proof.voting_stat.afp.block_id = format!("{}:stalled:8", epoch.id);
        assert_eq!(
            verify_aggregated_anchor_rotation_proof(&proof, &epoch),
            Err(RotationProofError::BlockIdMismatch)
        );
    }

    #[test]
    fn aarp_rejects_hash_mismatch_and_empty_stat() {
        let (a, b, c, d) = (keypair(1), keypair(2), keypair(3), keypair(4));
        let epoch = epoch_with_quorum(&[&a, &b, &c, &d]);

        let mut proof = rotation_proof(&[&a, &b, &c], &epoch, "stalled", 7, "h7");
        proof.voting_stat.afp.block_hash = "other".into();
        assert_eq!(
            verify_aggregated_anchor_rotation_proof(&proof, &epoch),
            Err(RotationProofError::HashMismatch)
        );

        let mut empty = rotation_proof(&[&a, &b, &c], &epoch, "stalled", 7, "h7");
        empty.voting_stat.index = -1;
        assert_eq!(
            verify_aggregated_anchor_rotation_proof(&empty, &epoch),
            Err(RotationProofError::InvalidVotingStat)
        );
    }

    #[test]
    fn aarp_counts_unique_signers_only() {
        let (a, b, c, d) = (keypair(1), keypair(2), keypair(3), keypair(4));
        let epoch = epoch_with_quorum(&[&a, &b, &c, &d]);
        let proof = rotation_proof(&[&a, &b], &epoch, "stalled", 7, "h7");
        assert_eq!(
            verify_aggregated_anchor_rotation_proof(&proof, &epoch),
            Err(RotationProofError::InsufficientSignatures { got: 2, need: 3 })
        );
    }

    #[test]
    fn upgrade_proposal_branches() {
        let (a, b, c) = (keypair(1), keypair(2), keypair(3));
        let epoch = epoch_with_quorum(&[&a, &b, &c]);
        let creator = "stalledAnchor";

        let current = VotingStat {
            index: 4,
            hash: "h4".into(),
            ..Default::default()
        };

        let block_id = format!("{}:{creator}:7", epoch.id);
        let afp = signed_afp(&[&a, &b, &c], &epoch, "h4", &block_id, "h7");
        let proposal = VotingStat {
            index: 7,
            hash: "h7".into(),
            afp,
        };

        assert_eq!(
            validate_upgrade_proposal(&current, &proposal, epoch.id, creator, &epoch),
            Ok(())
        );

        // Non-advancing proposal.
        assert!(matches!(
            validate_upgrade_proposal(&proposal, &proposal, epoch.id, creator, &epoch),
            Err(ProposalError::NotAdvancing { .. })
        ));

        // Wrong creator in the AFP block id.
        assert_eq!(
            validate_upgrade_proposal(&current, &proposal, epoch.id, "someoneElse", &epoch),
            Err(ProposalError::CreatorMismatch)
        );

        // Broken prev-hash chain.
        let moved = VotingStat {
            index: 5,
            hash: "h5".into(),
            ..Default::default()
        };
        assert_eq!(
            validate_upgrade_proposal(&moved, &proposal, epoch.id, creator, &epoch),
            Err(ProposalError::PrevHashMismatch)
        );
    }

    #[test]
    fn pulled_stat_validation() {
        let (a, b, c) = (keypair(1), keypair(2), keypair(3));
        let epoch = epoch_with_quorum(&[&a, &b, &c]);
        let creator = "peerAnchor";

        let block_id = format!("{}:{creator}:3", epoch.id);
        let afp = signed_afp(&[&a, &b, &c], &epoch, "h2", &block_id, "h3");
        let candidate = VotingStat {
            index: 3,
            hash: "h3".into(),
            afp,
        };
        assert!(validate_pulled_stat(&candidate, epoch.id, creator, &epoch));
        assert!(!validate_pulled_stat(&candidate, epoch.id, "other", &epoch));

        let mut tampered = candidate.clone();
        tampered.hash = "h9".into();
        assert!(!validate_pulled_stat(&tampered, epoch.id, creator, &epoch));
    }

    #[test]
    fn payload_shapes() {
        assert_eq!(
            finalization_payload("p", "0:pk:1", "h", "abc#0"),
            "p:0:pk:1:h:abc#0"
        );
        assert_eq!(
            rotation_payload("pk", 7, "h7", 5),
            "ANCHOR_ROTATION_PROOF:pk:7:h7:5"
        );
    }
}
