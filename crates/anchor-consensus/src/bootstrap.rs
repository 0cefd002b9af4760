//! Startup: load the approvement-thread state from the store, or seed it
//! from genesis on first launch.

use anchor_storage::{BatchOp, StorageError, Stores};
use anchor_types::epoch::{ApprovementThreadState, GenerationThreadMetadata};
use anchor_types::genesis::Genesis;
use anchor_types::keys::{
    anchor_storage_key, epoch_finish_key, epoch_handler_key, generation_metadata_key, AT_KEY,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A store read or write failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The genesis record cannot seed a working state.
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),
}

/// Loads the persisted approvement-thread state, seeding it from genesis
/// when the store is empty. Either way the resident window is trimmed to
/// the configured maximum before it is returned.
pub fn load_or_seed_state(
    stores: &Stores,
    genesis: &Genesis,
) -> Result<ApprovementThreadState, BootstrapError> {
    let mut state = match stores
        .approvement_thread_metadata
        .get_json::<ApprovementThreadState>(AT_KEY)?
    {
        Some(state) => state,
        None => seed_from_genesis(stores, genesis)?,
    };
    ensure_window(stores, &mut state)?;
    Ok(state)
}

fn seed_from_genesis(
    stores: &Stores,
    genesis: &Genesis,
) -> Result<ApprovementThreadState, BootstrapError> {
    if genesis.anchors.is_empty() {
        return Err(BootstrapError::InvalidGenesis("empty anchor roster".into()));
    }

    let mut params = genesis.network_parameters.clone();
    if params.max_epochs_to_support == 0 {
        params.max_epochs_to_support = 1;
    }

    let first_epoch = genesis.first_epoch_handler();
    let state = ApprovementThreadState {
        network_parameters: params,
        supported_epochs: vec![first_epoch.clone()],
    };

    // Anchor endpoint records and the state itself land in one batch, so a
    // crash mid-seed leaves the store either empty or fully seeded.
    let mut ops: Vec<BatchOp> = Vec::with_capacity(genesis.anchors.len() + 1);
    for anchor in &genesis.anchors {
        let raw = serde_json::to_vec(anchor).map_err(|e| StorageError::Codec(e.to_string()))?;
        ops.push(BatchOp::Put(anchor_storage_key(&anchor.pubkey), raw));
    }
    let raw_state = serde_json::to_vec(&state).map_err(|e| StorageError::Codec(e.to_string()))?;
    ops.push(BatchOp::Put(AT_KEY.to_string(), raw_state));
    stores.approvement_thread_metadata.write_batch(ops)?;

    stores
        .epoch_data
        .put_json(&epoch_handler_key(first_epoch.id), &first_epoch)?;

    tracing::info!(target: "bootstrap", epoch = %first_epoch.full_id(), "seeded state from genesis");
    Ok(state)
}

fn ensure_window(stores: &Stores, state: &mut ApprovementThreadState) -> Result<(), BootstrapError> {
    if state.network_parameters.max_epochs_to_support == 0 {
        state.network_parameters.max_epochs_to_support = 1;
    }
    let max = state.network_parameters.max_epochs_to_support;
    let mut trimmed = false;
    while state.supported_epochs.len() > max {
        let dropped = state.supported_epochs.remove(0);
        stores
            .finalization_voting_stats
            .put(&epoch_finish_key(dropped.id), b"TRUE")?;
        stores
            .blocks
            .delete(&generation_metadata_key(&dropped.full_id()))?;
        trimmed = true;
    }
    if trimmed {
        stores
            .approvement_thread_metadata
            .put_json(AT_KEY, state)?;
    }
    Ok(())
}

/// Loads (or initializes) the generation pointer of every resident epoch.
pub fn load_generation_pointers(
    stores: &Stores,
    state: &ApprovementThreadState,
) -> Result<HashMap<String, GenerationThreadMetadata>, BootstrapError> {
    let mut pointers = HashMap::new();
    for epoch in &state.supported_epochs {
        let full_id = epoch.full_id();
        let metadata = stores
            .blocks
            .get_json::<GenerationThreadMetadata>(&generation_metadata_key(&full_id))?
            .unwrap_or_else(|| GenerationThreadMetadata::initial(full_id.clone()));
        pointers.insert(full_id, metadata);
    }
    Ok(pointers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_types::epoch::NetworkParameters;
    use anchor_types::genesis::AnchorStorage;

    fn genesis() -> Genesis {
        Genesis {
            network_id: "testnet".into(),
            first_epoch_start_timestamp: 1_000,
            network_parameters: NetworkParameters {
                quorum_size: 2,
                epoch_duration: 60_000,
                block_time: 1_000,
                max_epochs_to_support: 2,
                health_check_interval_ms: 5_000,
            },
            anchors: vec![
                AnchorStorage {
                    pubkey: "pkA".into(),
                    anchor_url: "http://a".into(),
                    wss_anchor_url: "ws://a".into(),
                },
                AnchorStorage {
                    pubkey: "pkB".into(),
                    anchor_url: "http://b".into(),
                    wss_anchor_url: "ws://b".into(),
                },
            ],
        }
    }

    fn open_stores(dir: &std::path::Path) -> Stores {
        Stores::open_all(&dir.join("chaindata")).unwrap()
    }

    #[test]
    fn seeds_and_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = genesis();

        let seeded = {
            let stores = open_stores(dir.path());
            load_or_seed_state(&stores, &genesis).unwrap()
        };
        assert_eq!(seeded.supported_epochs.len(), 1);
        assert_eq!(seeded.supported_epochs[0].id, 0);

        let stores = open_stores(dir.path());
        let reloaded = load_or_seed_state(&stores, &genesis).unwrap();
        assert_eq!(
            reloaded.supported_epochs[0].hash,
            seeded.supported_epochs[0].hash
        );

        // Anchor endpoint records were written.
        let record = stores
            .approvement_thread_metadata
            .get_json::<AnchorStorage>(&anchor_storage_key("pkA"))
            .unwrap();
        assert_eq!(record.unwrap().anchor_url, "http://a");

        // The epoch-0 handler is published for external readers.
        assert!(stores
            .epoch_data
            .contains(&epoch_handler_key(0))
            .unwrap());
    }

    #[test]
    fn empty_roster_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open_stores(dir.path());
        let mut genesis = genesis();
        genesis.anchors.clear();
        assert!(matches!(
            load_or_seed_state(&stores, &genesis),
            Err(BootstrapError::InvalidGenesis(_))
        ));
    }

    #[test]
    fn oversized_window_is_trimmed_with_markers() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open_stores(dir.path());
        let genesis = genesis();
        let mut state = load_or_seed_state(&stores, &genesis).unwrap();

        // Grow the window beyond the supported maximum by hand.
        let params = state.network_parameters.clone();
        for _ in 0..3 {
            let next = state.supported_epochs.last().unwrap().derive_next(&params);
            state.supported_epochs.push(next);
        }
        stores
            .approvement_thread_metadata
            .put_json(AT_KEY, &state)
            .unwrap();

        let reloaded = load_or_seed_state(&stores, &genesis).unwrap();
        assert_eq!(reloaded.supported_epochs.len(), 2);
        assert_eq!(reloaded.supported_epochs[0].id, 2);
        assert!(stores
            .finalization_voting_stats
            .contains(&epoch_finish_key(0))
            .unwrap());
        assert!(stores
            .finalization_voting_stats
            .contains(&epoch_finish_key(1))
            .unwrap());
    }

    #[test]
    fn generation_pointers_resume_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open_stores(dir.path());
        let genesis = genesis();
        let state = load_or_seed_state(&stores, &genesis).unwrap();
        let full_id = state.supported_epochs[0].full_id();

        // Simulate a previous run that generated five blocks.
        let persisted = GenerationThreadMetadata {
            epoch_full_id: full_id.clone(),
            prev_hash: "h4".into(),
            next_index: 5,
        };
        stores
            .blocks
            .put_json(&generation_metadata_key(&full_id), &persisted)
            .unwrap();

        let pointers = load_generation_pointers(&stores, &state).unwrap();
        assert_eq!(pointers.get(&full_id).unwrap().next_index, 5);
        assert_eq!(pointers.get(&full_id).unwrap().prev_hash, "h4");
    }
}
