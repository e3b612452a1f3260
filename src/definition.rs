// Copyright 2025 Cowboy AI, LLC.

//! Definitions and the definition store
//!
//! A [`Definition`] is an immutable, ordered pipeline of [`StepSpec`]s plus
//! the payload the first step receives. Definitions are owned by an external
//! store; the run aggregate embeds them by value and never mutates them.

use crate::{errors::RunError, identifiers::DefinitionId, persistence::StoreError};
use async_trait::async_trait;
use lru::LruCache;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Opaque step input/output payload
pub type Payload = serde_json::Value;

/// A named, statically configured unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepSpec {
    /// Action name the dispatcher routes on (e.g. `fetchURL`)
    pub name: String,
    /// Static configuration handed to the action with every dispatch
    #[serde(default)]
    pub config: Payload,
}

impl StepSpec {
    /// Create a step with no configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Payload::Null,
        }
    }

    /// Attach static configuration
    pub fn with_config(mut self, config: Payload) -> Self {
        self.config = config;
        self
    }

    /// Check the step is dispatchable
    pub fn validate(&self) -> Result<(), RunError> {
        if self.name.is_empty() {
            return Err(RunError::Validation("step name is empty".to_string()));
        }
        if self.name.trim() != self.name {
            return Err(RunError::Validation(format!(
                "step name {:?} has surrounding whitespace",
                self.name
            )));
        }
        if !(self.config.is_object() || self.config.is_null()) {
            return Err(RunError::Validation(format!(
                "config of step {} must be an object or null",
                self.name
            )));
        }
        Ok(())
    }
}

/// Immutable ordered sequence of steps plus the initial input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Definition {
    /// Store identity of this definition
    pub id: DefinitionId,
    /// Steps in execution order
    pub steps: Vec<StepSpec>,
    /// Payload given to the first step
    pub initial_input: Payload,
}

impl Definition {
    /// Create a definition
    pub fn new(id: DefinitionId, steps: Vec<StepSpec>, initial_input: Payload) -> Self {
        Self {
            id,
            steps,
            initial_input,
        }
    }

    /// Same definition, different initial input
    ///
    /// Used when a definition runs as a sub-step of another run and the
    /// parent supplies the input.
    pub fn with_initial_input(&self, input: Payload) -> Self {
        Self {
            initial_input: input,
            ..self.clone()
        }
    }

    /// Step at `index`, if the pipeline is that long
    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    /// Number of steps in the pipeline
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Validate the definition before anything is written for it
    pub fn validate(&self) -> Result<(), RunError> {
        if self.steps.is_empty() {
            return Err(RunError::Validation(format!(
                "definition {} has no steps",
                self.id
            )));
        }
        self.steps.iter().try_for_each(StepSpec::validate)
    }
}

/// Read access to the external definition store
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Fetch a definition by id
    async fn get(&self, id: &DefinitionId) -> Result<Option<Definition>, StoreError>;
}

/// Fetch a definition and check it before any aggregate is touched
pub(crate) async fn load_valid_definition(
    store: &dyn DefinitionStore,
    id: &DefinitionId,
) -> Result<Definition, RunError> {
    let definition = store
        .get(id)
        .await?
        .ok_or(RunError::DefinitionNotFound(*id))?;
    if definition.id != *id {
        return Err(RunError::Validation(format!(
            "store returned definition {} for id {}",
            definition.id, id
        )));
    }
    definition.validate()?;
    Ok(definition)
}

/// In-memory definition store for testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryDefinitionStore {
    definitions: Arc<RwLock<HashMap<DefinitionId, Definition>>>,
}

impl InMemoryDefinitionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition
    pub async fn insert(&self, definition: Definition) {
        self.definitions
            .write()
            .await
            .insert(definition.id, definition);
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn get(&self, id: &DefinitionId) -> Result<Option<Definition>, StoreError> {
        Ok(self.definitions.read().await.get(id).cloned())
    }
}

/// LRU cache in front of another definition store
///
/// Definitions never change after creation, so a cached entry is never stale.
/// Absent lookups are not cached.
pub struct CachedDefinitionStore {
    inner: Arc<dyn DefinitionStore>,
    cache: Mutex<LruCache<DefinitionId, Definition>>,
}

impl CachedDefinitionStore {
    /// Wrap `inner` with a cache holding at most `capacity` definitions
    pub fn new(inner: Arc<dyn DefinitionStore>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached definitions
    pub async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl DefinitionStore for CachedDefinitionStore {
    async fn get(&self, id: &DefinitionId) -> Result<Option<Definition>, StoreError> {
        if let Some(definition) = self.cache.lock().await.get(id).cloned() {
            debug!(definition_id = %id, "Definition cache hit");
            return Ok(Some(definition));
        }

        let fetched = self.inner.get(id).await?;
        if let Some(definition) = &fetched {
            self.cache.lock().await.put(*id, definition.clone());
        }
        Ok(fetched)
    }
}
