//! The immutable genesis record.

use crate::epoch::{select_quorum, EpochDataHandler, NetworkParameters};
use anchor_crypto::hash_blake3;
use serde::{Deserialize, Serialize};

/// Published endpoints of one committee member. Persisted per anchor under
/// `<pubkey>_ANCHOR_STORAGE` so URL resolution never needs the genesis file
/// after bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorStorage {
    /// Base58 public key of the anchor.
    pub pubkey: String,
    /// HTTP endpoint of the anchor.
    #[serde(rename = "anchorURL")]
    pub anchor_url: String,
    /// Websocket endpoint of the anchor.
    #[serde(rename = "wssAnchorURL")]
    pub wss_anchor_url: String,
}

/// The genesis record: network identity, the first epoch's start, the fixed
/// committee roster, and the network parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    /// Opaque network identifier mixed into every block hash.
    #[serde(rename = "NETWORK_ID")]
    pub network_id: String,
    /// Start of epoch 0, ms since the Unix epoch.
    #[serde(rename = "FIRST_EPOCH_START_TIMESTAMP")]
    pub first_epoch_start_timestamp: u64,
    /// Parameters fixed for the lifetime of the network.
    #[serde(rename = "NETWORK_PARAMETERS")]
    pub network_parameters: NetworkParameters,
    /// The committee roster with published endpoints.
    #[serde(rename = "ANCHORS")]
    pub anchors: Vec<AnchorStorage>,
}

impl Genesis {
    /// Derives the epoch-0 handler: its hash is
    /// `Blake3(zeroSeed ∥ networkId ∥ firstTimestamp)` and its quorum is the
    /// seeded pick over the genesis roster.
    pub fn first_epoch_handler(&self) -> EpochDataHandler {
        let registry: Vec<String> = self.anchors.iter().map(|a| a.pubkey.clone()).collect();
        let hash = hash_blake3(&format!(
            "{}{}{}",
            anchor_crypto::ZERO_HASH,
            self.network_id,
            self.first_epoch_start_timestamp
        ));
        let quorum = select_quorum(&registry, self.network_parameters.quorum_size, &hash);
        EpochDataHandler {
            id: 0,
            hash,
            anchors_registry: registry,
            quorum,
            start_timestamp: self.first_epoch_start_timestamp,
        }
    }
}
