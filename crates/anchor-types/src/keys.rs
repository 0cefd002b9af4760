//! Builders for the persistent key layout.
//!
//! Four namespaces share these keys (see the storage crate): `BLOCKS`,
//! `EPOCH_DATA`, `APPROVEMENT_THREAD_METADATA`, `FINALIZATION_VOTING_STATS`.
//! Keeping every key shape here prevents the drift that plagues
//! string-assembled keys spread across call sites.

/// `APPROVEMENT_THREAD_METADATA`: the singleton approvement-thread state.
pub const AT_KEY: &str = "AT";

/// `FINALIZATION_VOTING_STATS`: prefix of the PoD outbox entries.
pub const POD_OUTBOX_PREFIX: &str = "ANCHORS_POD_OUTBOX:";

/// `BLOCKS`: the generation pointer of one epoch.
pub fn generation_metadata_key(epoch_full_id: &str) -> String {
    format!("GT:{epoch_full_id}")
}

/// `EPOCH_DATA`: an AFP keyed by the block id it votes for.
pub fn afp_key(block_id: &str) -> String {
    format!("AFP:{block_id}")
}

/// `EPOCH_DATA`: snapshot of a seeded epoch handler for external readers.
pub fn epoch_handler_key(epoch_id: u64) -> String {
    format!("EPOCH_HANDLER:{epoch_id}")
}

/// `FINALIZATION_VOTING_STATS`: marker that an epoch was closed locally.
pub fn epoch_finish_key(epoch_id: u64) -> String {
    format!("EPOCH_FINISH:{epoch_id}")
}

/// `APPROVEMENT_THREAD_METADATA`: published endpoints of one anchor.
pub fn anchor_storage_key(pubkey: &str) -> String {
    format!("{pubkey}_ANCHOR_STORAGE")
}

/// `FINALIZATION_VOTING_STATS`: the voting stat of one creator in one epoch.
pub fn voting_stat_key(epoch_id: u64, creator: &str) -> String {
    format!("{epoch_id}:{creator}")
}

/// `FINALIZATION_VOTING_STATS`: the persisted proofs-grabber pointer.
pub fn proofs_grabber_key(epoch_id: u64) -> String {
    format!("{epoch_id}:PROOFS_GRABBER")
}

/// `FINALIZATION_VOTING_STATS`: a stored rotation proof.
pub fn aarp_key(epoch_id: u64, anchor: &str) -> String {
    format!("AARP:{epoch_id}:{anchor}")
}

/// Prefix of all stored rotation proofs of one epoch.
pub fn aarp_prefix(epoch_id: u64) -> String {
    format!("AARP:{epoch_id}:")
}

/// `FINALIZATION_VOTING_STATS`: marker that `block_creator` embedded the AARP
/// rotating `rotated_anchor` into one of its blocks.
pub fn aarp_presence_key(epoch_id: u64, block_creator: &str, rotated_anchor: &str) -> String {
    format!("AARP_PRESENCE:{epoch_id}:{block_creator}:{rotated_anchor}")
}

/// `FINALIZATION_VOTING_STATS`: marker that `receiver` is itself targeted by
/// a valid AARP, which stops all deliveries to it.
pub fn aarp_disabled_key(epoch_id: u64, receiver: &str) -> String {
    format!("AARP_DISABLED:{epoch_id}:{receiver}")
}

/// `FINALIZATION_VOTING_STATS`: the health-monitor disable record.
pub fn creator_health_key(epoch_id: u64, creator: &str) -> String {
    format!("BLOCK_CREATOR_HEALTH:{epoch_id}:{creator}")
}

/// `FINALIZATION_VOTING_STATS`: a queued PoD payload.
pub fn pod_outbox_key(id: &str) -> String {
    format!("{POD_OUTBOX_PREFIX}{id}")
}

/// Deterministic id of one finalized block push towards the PoD.
pub fn pod_block_payload_id(epoch_id: u64, creator: &str, index: u64) -> String {
    format!("ANCHOR_BLOCK:{epoch_id}:{creator}:{index}")
}
