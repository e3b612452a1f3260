// Copyright 2025 Cowboy AI, LLC.

//! # Persistence Layer
//!
//! Versioned storage for run aggregates and the optimistic-concurrency
//! discipline built on it.
//!
//! ## Components
//!
//! - **Store contract**: `get` / `add` / `update` with compare-and-swap
//! - **Versioned mutation**: load, decide, write, retry on conflict
//! - **In-memory store**: test double with fault injection
//! - **NATS KV store**: JetStream key/value bucket, revision as version

pub mod in_memory;
pub mod nats_kv;
pub mod store;
pub mod versioned;

pub use in_memory::{InMemoryRunStore, InMemoryVersionedStore};
pub use nats_kv::{NatsKvConfig, NatsKvRunStore, NatsKvRunStoreBuilder};
pub use store::{SharedRunStore, StoreError, Versioned, VersionedStore};
pub use versioned::{mutate_versioned, Decision, MutateError, RetryPolicy};
