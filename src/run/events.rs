// Copyright 2025 Cowboy AI, LLC.

//! Run events
//!
//! Events are the only state a run aggregate stores. Everything else
//! (running step, last completed step, derived state) is folded from them.

use crate::{
    definition::{Definition, Payload, StepSpec},
    identifiers::StepId,
};
use serde::{Deserialize, Serialize};

/// Three-way outcome of a step or of a whole definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum StepResult {
    /// The step produced a payload for the next step
    Data(Payload),
    /// The step finished but produced nothing to pass on
    NoData,
    /// The step reported a business error
    Error(String),
}

impl StepResult {
    /// Payload carried by a `Data` result
    pub fn data(&self) -> Option<&Payload> {
        match self {
            StepResult::Data(payload) => Some(payload),
            StepResult::NoData | StepResult::Error(_) => None,
        }
    }

    /// Whether this is the `Data` variant
    pub fn is_data(&self) -> bool {
        matches!(self, StepResult::Data(_))
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            StepResult::Data(_) => "data",
            StepResult::NoData => "no_data",
            StepResult::Error(_) => "error",
        }
    }
}

/// Events recorded by the run aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// The run was bound to its definition. Always the first event.
    DefinitionAdded {
        /// Definition embedded by value
        definition: Definition,
    },

    /// A step was handed to the dispatcher
    StepRunning {
        /// Fresh id for this dispatch
        step_id: StepId,
        /// Spec of the step being run
        step: StepSpec,
        /// Input given to the step
        input: Payload,
    },

    /// The running step was abandoned
    StepCanceled {
        /// Step that was canceled
        step_id: StepId,
    },

    /// The running step could not be carried out
    StepFailed {
        /// Step that failed
        step_id: StepId,
        /// Failure description
        error: String,
    },

    /// The running step reported back
    StepCompleted {
        /// Step that completed
        step_id: StepId,
        /// What the step reported
        result: StepResult,
    },

    /// The pipeline finished
    DefinitionCompleted {
        /// Result of the last completed step
        result: StepResult,
    },

    /// The run was failed as a whole
    Failed {
        /// Failure description
        error: String,
    },
}

impl RunEvent {
    /// Event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::DefinitionAdded { .. } => "DefinitionAdded",
            RunEvent::StepRunning { .. } => "StepRunning",
            RunEvent::StepCanceled { .. } => "StepCanceled",
            RunEvent::StepFailed { .. } => "StepFailed",
            RunEvent::StepCompleted { .. } => "StepCompleted",
            RunEvent::DefinitionCompleted { .. } => "DefinitionCompleted",
            RunEvent::Failed { .. } => "Failed",
        }
    }

    /// Step this event concerns, if any
    pub fn step_id(&self) -> Option<StepId> {
        match self {
            RunEvent::StepRunning { step_id, .. }
            | RunEvent::StepCanceled { step_id }
            | RunEvent::StepFailed { step_id, .. }
            | RunEvent::StepCompleted { step_id, .. } => Some(*step_id),
            RunEvent::DefinitionAdded { .. }
            | RunEvent::DefinitionCompleted { .. }
            | RunEvent::Failed { .. } => None,
        }
    }
}
