// Copyright 2025 Cowboy AI, LLC.

//! Error types for run operations
//!
//! Guard rejections inside the run aggregate are not errors; they surface as
//! "no event". Only infrastructure faults and outward call failures are
//! modelled here, classified so a message consumer knows what to do with the
//! inbound message that caused them.

use crate::{
    coordinator::Disposition,
    identifiers::{DefinitionId, RunId, StepId},
    persistence::{MutateError, StoreError},
};
use thiserror::Error;

/// Errors that can occur while driving a run
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// No aggregate exists for the targeted run
    #[error("Run not found: {run_id} with definition {definition_id}")]
    NotFound {
        /// Targeted run
        run_id: RunId,
        /// Targeted definition
        definition_id: DefinitionId,
    },

    /// The definition store has no such definition
    #[error("Definition not found: {0}")]
    DefinitionNotFound(DefinitionId),

    /// An inbound definition or step spec was rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// The persistence collaborator faulted
    #[error("Storage error: {0}")]
    StorageFault(String),

    /// Every compare-and-swap attempt lost to a concurrent writer
    #[error("Concurrency conflict: {key} still contended after {attempts} attempts")]
    ConflictRetriesExhausted {
        /// Contended run key
        key: String,
        /// Attempts made
        attempts: usize,
    },

    /// Dispatching the first step failed; the step has been failed
    #[error("Run first step failed: step {step_id} - {message}")]
    RunFirstStepFailure {
        /// Step that could not be dispatched
        step_id: StepId,
        /// Dispatcher error
        message: String,
    },

    /// Dispatching a follow-up step failed; the step has been failed
    #[error("Run next step failed: step {step_id} - {message}")]
    RunNextStepFailure {
        /// Step that could not be dispatched
        step_id: StepId,
        /// Dispatcher error
        message: String,
    },

    /// Notifying completion failed; the run has been failed
    #[error("Complete definition failed: {message}")]
    CompleteDefinitionFailure {
        /// Notifier error
        message: String,
    },
}

/// Result type for run operations
pub type RunResult<T> = Result<T, RunError>;

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Storage(message) => RunError::StorageFault(message),
            StoreError::Serialization(_) => RunError::StorageFault(err.to_string()),
        }
    }
}

impl From<MutateError> for RunError {
    fn from(err: MutateError) -> Self {
        match err {
            MutateError::Store(store) => store.into(),
            MutateError::RetriesExhausted { key, attempts } => {
                RunError::ConflictRetriesExhausted { key, attempts }
            }
        }
    }
}

impl RunError {
    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RunError::NotFound { .. } | RunError::DefinitionNotFound(_)
        )
    }

    /// Check if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(self, RunError::Validation(_))
    }

    /// Check if the inbound message should be redelivered
    pub fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            RunError::StorageFault(_) | RunError::ConflictRetriesExhausted { .. }
        )
    }

    /// Check if this wraps an outward call failure that was compensated
    pub fn is_compensated(&self) -> bool {
        matches!(
            self,
            RunError::RunFirstStepFailure { .. }
                | RunError::RunNextStepFailure { .. }
                | RunError::CompleteDefinitionFailure { .. }
        )
    }

    /// Step that was failed in compensation, if any
    pub fn compensated_step(&self) -> Option<StepId> {
        match self {
            RunError::RunFirstStepFailure { step_id, .. }
            | RunError::RunNextStepFailure { step_id, .. } => Some(*step_id),
            _ => None,
        }
    }

    /// What a message consumer should do with the inbound message
    pub fn disposition(&self) -> Disposition {
        if self.is_storage_fault() {
            Disposition::Redeliver
        } else {
            Disposition::Drop
        }
    }
}
