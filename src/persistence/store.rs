// Copyright 2025 Cowboy AI, LLC.

//! Versioned storage contract
//!
//! A backing store hands out `(version, aggregate)` pairs and accepts writes
//! only at the version it handed out. That compare-and-swap is the single
//! concurrency primitive the workflows rely on.

use crate::run::{RunAggregate, RunKey};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a backing store
///
/// A version conflict is not an error: `add` and `update` report it by
/// returning `false`.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store itself failed (connection, timeout, bucket missing, ...)
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// An aggregate together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<A> {
    /// Version to pass back to [`VersionedStore::update`]
    pub version: u64,
    /// The stored aggregate
    pub aggregate: A,
}

/// Storage collaborator contract
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Key type
    type Key: Send + Sync + fmt::Display;
    /// Stored aggregate type
    type Aggregate: Send + Sync;

    /// Load the current version of an aggregate
    async fn get(&self, key: &Self::Key)
        -> Result<Option<Versioned<Self::Aggregate>>, StoreError>;

    /// Store a new aggregate. Returns `false` if one already exists.
    async fn add(&self, key: &Self::Key, aggregate: &Self::Aggregate) -> Result<bool, StoreError>;

    /// Replace an aggregate. Returns `false` if `version` is no longer current.
    async fn update(
        &self,
        key: &Self::Key,
        version: u64,
        aggregate: &Self::Aggregate,
    ) -> Result<bool, StoreError>;
}

/// Run aggregate store shared between workflows
pub type SharedRunStore = Arc<dyn VersionedStore<Key = RunKey, Aggregate = RunAggregate>>;
