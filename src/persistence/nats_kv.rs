// Copyright 2025 Cowboy AI, LLC.

//! NATS KV-backed run store
//!
//! The KV revision of an entry is the aggregate version: `add` maps to
//! `create` and `update` to a revision-checked `update`, so the bucket
//! performs the compare-and-swap.

use crate::{
    persistence::{StoreError, Versioned, VersionedStore},
    run::{RunAggregate, RunKey},
};
use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for the NATS KV run store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsKvConfig {
    /// KV bucket name
    pub bucket_name: String,
    /// History depth kept per run
    pub history: i64,
    /// Prefix of every key in the bucket
    pub key_prefix: String,
}

impl Default for NatsKvConfig {
    fn default() -> Self {
        Self {
            bucket_name: "saga-runs".to_string(),
            history: 5,
            key_prefix: "run".to_string(),
        }
    }
}

/// Run store kept in a JetStream key/value bucket
pub struct NatsKvRunStore {
    kv: kv::Store,
    config: NatsKvConfig,
}

impl NatsKvRunStore {
    /// Create (or open) the bucket and wrap it
    pub async fn new(client: Client, config: NatsKvConfig) -> Result<Self, StoreError> {
        let js = jetstream::new(client);

        let kv = js
            .create_key_value(kv::Config {
                bucket: config.bucket_name.clone(),
                description: "Run aggregates".to_string(),
                history: config.history,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create KV bucket: {e}")))?;

        info!(bucket = %config.bucket_name, "NATS KV run store ready");

        Ok(Self { kv, config })
    }

    /// The configuration in use
    pub fn config(&self) -> &NatsKvConfig {
        &self.config
    }

    fn build_key(&self, key: &RunKey) -> String {
        build_key(&self.config.key_prefix, key)
    }
}

fn build_key(prefix: &str, key: &RunKey) -> String {
    format!("{}.{}.{}", prefix, key.run_id, key.definition_id)
}

fn encode(aggregate: &RunAggregate) -> Result<Bytes, StoreError> {
    Ok(Bytes::from(serde_json::to_vec(aggregate)?))
}

#[async_trait]
impl VersionedStore for NatsKvRunStore {
    type Key = RunKey;
    type Aggregate = RunAggregate;

    async fn get(&self, key: &RunKey) -> Result<Option<Versioned<RunAggregate>>, StoreError> {
        let entry = self
            .kv
            .entry(self.build_key(key))
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to load run {key}: {e}")))?;

        match entry {
            Some(entry) if matches!(entry.operation, kv::Operation::Put) => {
                let aggregate: RunAggregate = serde_json::from_slice(&entry.value)?;
                Ok(Some(Versioned {
                    version: entry.revision,
                    aggregate,
                }))
            }
            // Deleted and purged runs read as absent.
            _ => Ok(None),
        }
    }

    async fn add(&self, key: &RunKey, aggregate: &RunAggregate) -> Result<bool, StoreError> {
        match self
            .kv
            .create(self.build_key(key), encode(aggregate)?)
            .await
        {
            Ok(revision) => {
                debug!(run = %key, revision, "Created run");
                Ok(true)
            }
            Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => Ok(false),
            Err(e) => Err(StoreError::Storage(format!("Failed to create run {key}: {e}"))),
        }
    }

    async fn update(
        &self,
        key: &RunKey,
        version: u64,
        aggregate: &RunAggregate,
    ) -> Result<bool, StoreError> {
        match self
            .kv
            .update(self.build_key(key), encode(aggregate)?, version)
            .await
        {
            Ok(revision) => {
                debug!(run = %key, revision, "Updated run");
                Ok(true)
            }
            Err(e) if matches!(e.kind(), kv::UpdateErrorKind::WrongLastRevision) => Ok(false),
            Err(e) => Err(StoreError::Storage(format!("Failed to update run {key}: {e}"))),
        }
    }
}

/// Builder for [`NatsKvRunStore`]
pub struct NatsKvRunStoreBuilder {
    client: Option<Client>,
    config: NatsKvConfig,
}

impl NatsKvRunStoreBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            client: None,
            config: NatsKvConfig::default(),
        }
    }

    /// Set the NATS client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the bucket name
    pub fn bucket_name(mut self, name: impl Into<String>) -> Self {
        self.config.bucket_name = name.into();
        self
    }

    /// Set the history depth
    pub fn history(mut self, history: i64) -> Self {
        self.config.history = history;
        self
    }

    /// Set the key prefix
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Build the store
    pub async fn build(self) -> Result<NatsKvRunStore, StoreError> {
        let client = self
            .client
            .ok_or_else(|| StoreError::Storage("NATS client not provided".to_string()))?;

        NatsKvRunStore::new(client, self.config).await
    }
}

impl Default for NatsKvRunStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
