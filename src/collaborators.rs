// Copyright 2025 Cowboy AI, LLC.

//! Outward collaborators
//!
//! Step execution and completion notification happen out of process. Both
//! calls are fire-and-forget: a successful call only means the message was
//! handed off, and the reply to a dispatch arrives later as a separate
//! inbound completion.

use crate::{
    definition::Payload,
    identifiers::{DefinitionId, RunId, StepId},
    run::StepResult,
    trace::TraceMetadata,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by an outward call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The transport refused or lost the message
    #[error("Dispatch error: {0}")]
    Transport(String),

    /// The call did not finish in time
    #[error("Dispatch timed out after {after_ms}ms")]
    Timeout {
        /// Elapsed milliseconds
        after_ms: u64,
    },

    /// No worker handles the requested step
    #[error("No handler for step: {0}")]
    UnknownStep(String),
}

/// Everything a worker needs to execute one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Run the step belongs to
    pub run_id: RunId,
    /// Definition the run executes
    pub definition_id: DefinitionId,
    /// Fresh id of this dispatch
    pub step_id: StepId,
    /// Step input
    pub input: Payload,
    /// Static step configuration
    pub config: Payload,
    /// Metadata to echo back with the completion
    pub trace: TraceMetadata,
}

/// Sends step execution requests to workers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Hand a step off for execution
    async fn dispatch(&self, step_name: &str, request: ActionRequest)
        -> Result<(), DispatchError>;
}

/// Tells the outside world a run finished
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Report the final result of a run
    async fn notify_completed(
        &self,
        run_id: RunId,
        definition_id: DefinitionId,
        result: &StepResult,
        trace: &TraceMetadata,
    ) -> Result<(), DispatchError>;
}
