// Copyright 2025 Cowboy AI, LLC.

//! Derived run states
//!
//! States are never stored. They are read off the event history by
//! [`RunAggregate::state`](crate::run::RunAggregate::state).

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for types that can be used as states of an aggregate
pub trait State: Debug + Clone + PartialEq + Eq + Send + Sync {
    /// Get the name of this state for logging/debugging
    fn name(&self) -> &'static str;

    /// Check if this is a terminal state
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Where a run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Nothing recorded yet
    NoDefinition,
    /// Bound to a definition, no step started
    DefinitionSet,
    /// A step is in flight
    StepRunning,
    /// The last step was canceled, failed or completed and nothing is in flight
    StepSettled,
    /// The pipeline finished
    DefinitionCompleted,
    /// The run was failed as a whole
    Failed,
}

impl State for RunState {
    fn name(&self) -> &'static str {
        match self {
            RunState::NoDefinition => "NoDefinition",
            RunState::DefinitionSet => "DefinitionSet",
            RunState::StepRunning => "StepRunning",
            RunState::StepSettled => "StepSettled",
            RunState::DefinitionCompleted => "DefinitionCompleted",
            RunState::Failed => "Failed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, RunState::DefinitionCompleted | RunState::Failed)
    }
}
