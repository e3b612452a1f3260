// Copyright 2025 Cowboy AI, LLC.

//! Coordinator configuration

use crate::persistence::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for [`RunCoordinator`](crate::RunCoordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bounds every optimistic-concurrency loop
    pub retry: RetryPolicy,
    /// Definitions kept in the LRU cache; 0 disables caching
    pub definition_cache_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            definition_cache_size: 256,
        }
    }
}
