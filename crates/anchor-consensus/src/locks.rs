//! Per-(epoch, creator) mutexes.
//!
//! Every state transition touching one anchor's voting stat or rotation
//! proof happens under this lock. Locks are created lazily and removed when
//! their epoch is evicted, so the registry stays bounded.

use dashmap::DashMap;
use std::sync::Arc;

/// Registry of lazily created per-(epoch, creator) async mutexes.
#[derive(Default)]
pub struct CreatorLockRegistry {
    inner: DashMap<(u64, String), Arc<tokio::sync::Mutex<()>>>,
}

impl CreatorLockRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex dedicated to `creator` within `epoch_id`. The same creator
    /// gets independent locks in different epochs, so cross-epoch work never
    /// serializes.
    pub fn get(&self, epoch_id: u64, creator: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .entry((epoch_id, creator.to_string()))
            .or_default()
            .clone()
    }

    /// Drops every lock of one epoch. Called on epoch eviction.
    pub fn remove_epoch(&self, epoch_id: u64) {
        self.inner.retain(|(epoch, _), _| *epoch != epoch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pair_shares_one_lock() {
        let registry = CreatorLockRegistry::new();
        let one = registry.get(1, "pk");
        let two = registry.get(1, "pk");
        assert!(Arc::ptr_eq(&one, &two));
    }

    #[test]
    fn epochs_get_independent_locks() {
        let registry = CreatorLockRegistry::new();
        let one = registry.get(1, "pk");
        let two = registry.get(2, "pk");
        assert!(!Arc::ptr_eq(&one, &two));
    }

    #[test]
    fn eviction_clears_only_the_epoch() {
        let registry = CreatorLockRegistry::new();
        let old = registry.get(1, "pk");
        let kept = registry.get(2, "pk");
        registry.remove_epoch(1);
        assert!(!Arc::ptr_eq(&old, &registry.get(1, "pk")));
        assert!(Arc::ptr_eq(&kept, &registry.get(2, "pk")));
    }
}
