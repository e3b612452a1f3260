// Copyright 2025 Cowboy AI, LLC.

//! Run commands
//!
//! Commands are intentions. Handling one against a run aggregate yields
//! exactly one event or none at all; "none" is an ordinary guard rejection.

use crate::{definition::Definition, run::StepResult};
use serde::{Deserialize, Serialize};

/// Commands accepted by the run aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunCommand {
    /// Bind a fresh aggregate to its definition
    SetDefinition(Definition),

    /// Start the first step of the definition
    RunFirstStep,

    /// Abandon the running step
    CancelRunningStep,

    /// Record that the running step could not be carried out
    FailRunningStep {
        /// Failure description
        error: String,
    },

    /// Record what the running step reported
    CompleteRunningStep {
        /// Reported result
        result: StepResult,
    },

    /// Start the step after the last completed one, or finish the definition
    RunNextStep,

    /// Fail the whole run
    Fail {
        /// Failure description
        error: String,
    },
}

impl RunCommand {
    /// Command name for logging
    pub fn name(&self) -> &'static str {
        match self {
            RunCommand::SetDefinition(_) => "SetDefinition",
            RunCommand::RunFirstStep => "RunFirstStep",
            RunCommand::CancelRunningStep => "CancelRunningStep",
            RunCommand::FailRunningStep { .. } => "FailRunningStep",
            RunCommand::CompleteRunningStep { .. } => "CompleteRunningStep",
            RunCommand::RunNextStep => "RunNextStep",
            RunCommand::Fail { .. } => "Fail",
        }
    }
}
