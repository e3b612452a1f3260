// Copyright 2025 Cowboy AI, LLC.

//! Trace metadata threaded through every hop
//!
//! A free-form string map. A handful of reserved keys are read and written
//! by the coordinator; every other key is carried along untouched.

use crate::identifiers::{DefinitionId, RunId, StepId, TaskId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Reserved key: run the hop belongs to
pub const RUN_ID: &str = "run_id";
/// Reserved key: step the hop belongs to
pub const STEP_ID: &str = "step_id";
/// Reserved key: definition the run executes
pub const DEFINITION_ID: &str = "definition_id";
/// Reserved key: external task correlation
pub const TASK_ID: &str = "task_id";
/// Reserved key: run that started this one as a step
pub const PARENT_RUN_ID: &str = "parent_run_id";
/// Reserved key: parent step waiting on this run
pub const PARENT_STEP_ID: &str = "parent_step_id";
/// Reserved key: the parent's own metadata, JSON encoded
pub const PARENT_METADATA: &str = "parent_metadata";

/// Errors reading reserved trace keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// A required reserved key is absent
    #[error("Missing trace key: {0}")]
    MissingKey(&'static str),

    /// A reserved key holds a value that does not parse
    #[error("Malformed trace key {key}: {value:?}")]
    Malformed {
        /// Offending key
        key: &'static str,
        /// Raw value
        value: String,
    },

    /// Nested metadata could not be encoded
    #[error("Trace encoding error: {0}")]
    Encoding(String),
}

/// Ordered key/value trace metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceMetadata(IndexMap<String, String>);

impl TraceMetadata {
    /// Empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set a key, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a key, keeping the order of the rest
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.shift_remove(key)
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Parse a reserved key, `None` when absent
    pub fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, TraceError> {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|_| TraceError::Malformed {
                    key,
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    /// Parse a reserved key that must be present
    pub fn require<T: FromStr>(&self, key: &'static str) -> Result<T, TraceError> {
        self.parse(key)?.ok_or(TraceError::MissingKey(key))
    }

    /// Run id, if recorded
    pub fn run_id(&self) -> Result<Option<RunId>, TraceError> {
        self.parse(RUN_ID)
    }

    /// Step id, if recorded
    pub fn step_id(&self) -> Result<Option<StepId>, TraceError> {
        self.parse(STEP_ID)
    }

    /// Definition id, if recorded
    pub fn definition_id(&self) -> Result<Option<DefinitionId>, TraceError> {
        self.parse(DEFINITION_ID)
    }

    /// Task id, if recorded
    pub fn task_id(&self) -> Result<Option<TaskId>, TraceError> {
        self.parse(TASK_ID)
    }

    /// Copy stamped with the identity of a dispatched step
    pub fn stamped(&self, run_id: RunId, definition_id: DefinitionId, step_id: StepId) -> Self {
        self.clone()
            .with(RUN_ID, run_id.to_string())
            .with(DEFINITION_ID, definition_id.to_string())
            .with(STEP_ID, step_id.to_string())
    }

    /// Whether this metadata carries a parent reference
    pub fn has_parent(&self) -> bool {
        self.contains_key(PARENT_RUN_ID)
    }

    /// Encode as a JSON string, for nesting inside other metadata
    pub fn to_json(&self) -> Result<String, TraceError> {
        serde_json::to_string(self).map_err(|e| TraceError::Encoding(e.to_string()))
    }

    /// Decode metadata nested under `key`
    pub fn nested(&self, key: &'static str) -> Result<Option<TraceMetadata>, TraceError> {
        self.get(key)
            .map(|raw| {
                serde_json::from_str(raw).map_err(|_| TraceError::Malformed {
                    key,
                    value: raw.to_string(),
                })
            })
            .transpose()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TraceMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_keys_keep_order() {
        let trace: TraceMetadata = [("traceparent", "00-abc"), ("tenant", "acme")]
            .into_iter()
            .collect();
        let stamped = trace.stamped(RunId::new(), DefinitionId::new(), StepId::new());

        let keys: Vec<_> = stamped.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["traceparent", "tenant", RUN_ID, DEFINITION_ID, STEP_ID]
        );
    }

    #[test]
    fn test_reserved_ids_parse() {
        let run_id = RunId::new();
        let step_id = StepId::new();
        let definition_id = DefinitionId::new();
        let trace = TraceMetadata::new().stamped(run_id, definition_id, step_id);

        assert_eq!(trace.run_id(), Ok(Some(run_id)));
        assert_eq!(trace.step_id(), Ok(Some(step_id)));
        assert_eq!(trace.definition_id(), Ok(Some(definition_id)));
        assert_eq!(trace.task_id(), Ok(None));
    }

    #[test]
    fn test_malformed_reserved_key() {
        let trace = TraceMetadata::new().with(RUN_ID, "not-a-uuid");

        assert_eq!(
            trace.run_id(),
            Err(TraceError::Malformed {
                key: RUN_ID,
                value: "not-a-uuid".to_string()
            })
        );
        assert_eq!(
            trace.require::<StepId>(STEP_ID),
            Err(TraceError::MissingKey(STEP_ID))
        );
    }

    #[test]
    fn test_nested_round_trip() {
        let inner = TraceMetadata::new().with("tenant", "acme");
        let outer = TraceMetadata::new().with(PARENT_METADATA, inner.to_json().unwrap());

        assert_eq!(outer.nested(PARENT_METADATA), Ok(Some(inner)));
        assert_eq!(outer.nested("missing"), Ok(None));
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let trace = TraceMetadata::new().with("a", "1");
        assert_eq!(serde_json::to_string(&trace).unwrap(), r#"{"a":"1"}"#);
    }
}
