#![forbid(unsafe_code)]

//! # Anchor Storage
//!
//! The four persistent namespaces of the anchors core (`BLOCKS`,
//! `EPOCH_DATA`, `APPROVEMENT_THREAD_METADATA`, `FINALIZATION_VOTING_STATS`),
//! each its own `redb` database under the chaindata directory.
//!
//! The surface is deliberately small: get/put/delete, an atomic write batch,
//! and an ordered prefix scan. Every semantically multi-key transition in the
//! core goes through [`KvStore::write_batch`] so a crash can never expose a
//! pointer referring to missing content.

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying engine failed.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored value failed to (de)serialize.
    #[error("storage codec error: {0}")]
    Codec(String),
}

impl StorageError {
    fn backend(e: impl std::fmt::Display) -> Self {
        Self::Backend(e.to_string())
    }
}

/// One operation of an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put(String, Vec<u8>),
    /// Remove a key (absent keys are fine).
    Delete(String),
}

/// A single ordered byte-keyed namespace.
pub struct KvStore {
    db: Database,
}

impl KvStore {
    /// Opens (or creates) the named namespace under `dir`.
    pub fn open(dir: &Path, name: &str) -> Result<Self, StorageError> {
        let db = Database::create(dir.join(name)).map_err(StorageError::backend)?;
        // Materialize the table so later read transactions always find it.
        let txn = db.begin_write().map_err(StorageError::backend)?;
        txn.open_table(KV).map_err(StorageError::backend)?;
        txn.commit().map_err(StorageError::backend)?;
        Ok(Self { db })
    }

    /// Reads a raw value.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read().map_err(StorageError::backend)?;
        let table = txn.open_table(KV).map_err(StorageError::backend)?;
        let value = table
            .get(key.as_bytes())
            .map_err(StorageError::backend)?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// Whether a key exists.
    pub fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Writes a raw value.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.write_batch(vec![BatchOp::Put(key.to_string(), value.to_vec())])
    }

    /// Removes a key.
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.write_batch(vec![BatchOp::Delete(key.to_string())])
    }

    /// Applies every operation in one transaction: either all of them become
    /// visible or none do.
    pub fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(StorageError::backend)?;
        {
            let mut table = txn.open_table(KV).map_err(StorageError::backend)?;
            for op in &ops {
                match op {
                    BatchOp::Put(key, value) => {
                        table
                            .insert(key.as_bytes(), value.as_slice())
                            .map_err(StorageError::backend)?;
                    }
                    BatchOp::Delete(key) => {
                        table.remove(key.as_bytes()).map_err(StorageError::backend)?;
                    }
                }
            }
        }
        txn.commit().map_err(StorageError::backend)
    }

    /// Returns every `(key, value)` whose key starts with `prefix`, in key
    /// order. Keys that are not valid UTF-8 never occur in this layout.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_read().map_err(StorageError::backend)?;
        let table = txn.open_table(KV).map_err(StorageError::backend)?;

        let start = prefix.as_bytes().to_vec();
        let end = prefix_upper_bound(&start);
        let mut out = Vec::new();

        let range = match &end {
            Some(end) => table
                .range(start.as_slice()..end.as_slice())
                .map_err(StorageError::backend)?,
            None => table
                .range(start.as_slice()..)
                .map_err(StorageError::backend)?,
        };

        for entry in range {
            let (key, value) = entry.map_err(StorageError::backend)?;
            let key = String::from_utf8_lossy(key.value()).into_owned();
            out.push((key, value.value().to_vec()));
        }
        Ok(out)
    }

    /// Reads and deserializes a JSON value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key)? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StorageError::Codec(e.to_string())),
            None => Ok(None),
        }
    }

    /// Serializes and writes a JSON value.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(value).map_err(|e| StorageError::Codec(e.to_string()))?;
        self.put(key, &raw)
    }
}

/// Smallest byte string greater than every key with the given prefix, or
/// `None` when the prefix is all `0xff`.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

/// The four namespaces, opened together.
pub struct Stores {
    /// Blocks and per-epoch generation pointers.
    pub blocks: KvStore,
    /// AFPs, epoch handlers, and epoch-level records.
    pub epoch_data: KvStore,
    /// The approvement-thread singleton and anchor endpoint records.
    pub approvement_thread_metadata: KvStore,
    /// Voting stats, grabber pointers, rotation proofs, health flags, outbox.
    pub finalization_voting_stats: KvStore,
}

impl Stores {
    /// Opens all namespaces under the chaindata directory, creating it first
    /// if needed.
    pub fn open_all(root: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root).map_err(StorageError::backend)?;
        Ok(Self {
            blocks: KvStore::open(root, "BLOCKS")?,
            epoch_data: KvStore::open(root, "EPOCH_DATA")?,
            approvement_thread_metadata: KvStore::open(root, "APPROVEMENT_THREAD_METADATA")?,
            finalization_voting_stats: KvStore::open(root, "FINALIZATION_VOTING_STATS")?,
        })
    }
}
