// Copyright 2025 Cowboy AI, LLC.

//! Optimistic-concurrency mutation
//!
//! [`mutate_versioned`] is the read-decide-write loop every workflow goes
//! through:
//!
//! 1. load `(version, aggregate)` or nothing
//! 2. call a pure `decide` function on the snapshot
//! 3. `add` (nothing was loaded) or `update` at the loaded version
//! 4. on a lost compare-and-swap, start again from 1
//!
//! `decide` may run several times for one call, so it must not have side
//! effects beyond building its output.

use crate::persistence::{StoreError, VersionedStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Bounds the conflict retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Read-decide-write cycles attempted before giving up (at least 1)
    pub max_attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 64 }
    }
}

/// What `decide` wants done with the snapshot it was given
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<A, T> {
    /// Write `aggregate` and return `output` once the write lands
    Write {
        /// New aggregate state
        aggregate: A,
        /// Value returned to the caller
        output: T,
    },
    /// Write nothing and return the value immediately
    Skip(T),
}

/// Errors from [`mutate_versioned`]
#[derive(Debug, Clone, Error)]
pub enum MutateError {
    /// The store faulted
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every attempt lost its compare-and-swap
    #[error("Concurrency conflict: {key} still contended after {attempts} attempts")]
    RetriesExhausted {
        /// Contended key
        key: String,
        /// Attempts made
        attempts: usize,
    },
}

/// Load, decide, compare-and-swap, retry on conflict
pub async fn mutate_versioned<S, T, F>(
    store: &S,
    key: &S::Key,
    policy: RetryPolicy,
    mut decide: F,
) -> Result<T, MutateError>
where
    S: VersionedStore + ?Sized,
    T: Send,
    F: FnMut(Option<&S::Aggregate>) -> Decision<S::Aggregate, T> + Send,
{
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        let current = store.get(key).await?;

        let decision = decide(current.as_ref().map(|loaded| &loaded.aggregate));
        let (aggregate, output) = match decision {
            Decision::Skip(output) => return Ok(output),
            Decision::Write { aggregate, output } => (aggregate, output),
        };

        let written = match &current {
            None => store.add(key, &aggregate).await?,
            Some(loaded) => store.update(key, loaded.version, &aggregate).await?,
        };
        if written {
            return Ok(output);
        }

        debug!(
            key = %key,
            attempt,
            "Lost compare-and-swap, retrying from a fresh read"
        );
    }

    Err(MutateError::RetriesExhausted {
        key: key.to_string(),
        attempts,
    })
}
