// Copyright 2025 Cowboy AI, LLC.

//! In-memory versioned store for testing
//!
//! Versions start at 1 on `add` and grow by one per `update`. Faults and
//! lost compare-and-swaps can be injected to exercise the retry and
//! redelivery paths without a real backing store.

use crate::{
    persistence::{StoreError, Versioned, VersionedStore},
    run::{RunAggregate, RunKey},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Versioned store backed by a `HashMap`
pub struct InMemoryVersionedStore<K, A> {
    entries: Arc<RwLock<HashMap<K, Versioned<A>>>>,
    pending_read_faults: AtomicUsize,
    pending_write_faults: AtomicUsize,
    pending_conflicts: AtomicUsize,
    writes: AtomicUsize,
}

/// In-memory store for run aggregates
pub type InMemoryRunStore = InMemoryVersionedStore<RunKey, RunAggregate>;

impl<K, A> Default for InMemoryVersionedStore<K, A> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            pending_read_faults: AtomicUsize::new(0),
            pending_write_faults: AtomicUsize::new(0),
            pending_conflicts: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
}

impl<K, A> InMemoryVersionedStore<K, A>
where
    K: Eq + Hash + Clone,
    A: Clone,
{
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` reads fail with a storage error
    pub fn fail_next_reads(&self, count: usize) {
        self.pending_read_faults.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail with a storage error
    pub fn fail_next_writes(&self, count: usize) {
        self.pending_write_faults.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes lose their compare-and-swap
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of writes that landed
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current value without going through the trait
    pub async fn snapshot(&self, key: &K) -> Option<A> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|entry| entry.aggregate.clone())
    }

    /// Insert a value directly, bypassing version checks
    pub async fn seed(&self, key: K, aggregate: A) {
        let mut entries = self.entries.write().await;
        let version = entries.get(&key).map_or(1, |entry| entry.version + 1);
        entries.insert(key, Versioned { version, aggregate });
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn before_write(&self) -> Result<bool, StoreError> {
        if Self::take(&self.pending_write_faults) {
            return Err(StoreError::Storage("injected write fault".to_string()));
        }
        Ok(!Self::take(&self.pending_conflicts))
    }
}

#[async_trait]
impl<K, A> VersionedStore for InMemoryVersionedStore<K, A>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Display,
    A: Clone + Send + Sync,
{
    type Key = K;
    type Aggregate = A;

    async fn get(&self, key: &K) -> Result<Option<Versioned<A>>, StoreError> {
        if Self::take(&self.pending_read_faults) {
            return Err(StoreError::Storage("injected read fault".to_string()));
        }
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn add(&self, key: &K, aggregate: &A) -> Result<bool, StoreError> {
        if !self.before_write()? {
            return Ok(false);
        }
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.clone(),
            Versioned {
                version: 1,
                aggregate: aggregate.clone(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn update(&self, key: &K, version: u64, aggregate: &A) -> Result<bool, StoreError> {
        if !self.before_write()? {
            return Ok(false);
        }
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if entry.version == version => {
                entry.version += 1;
                entry.aggregate = aggregate.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
