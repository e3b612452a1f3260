// Copyright 2025 Cowboy AI, LLC.

//! Nested-definition linkage
//!
//! A definition started as a step of another run carries a reference to
//! that parent in its trace metadata:
//!
//! - `parent_run_id` / `parent_step_id`: the step waiting on the child
//! - `parent_metadata`: the parent's own metadata, JSON encoded
//!
//! The parent's definition id is read from the nested metadata, so the
//! parent aggregate never needs to know about its children. When the child
//! finishes, the reference is parsed back out and turned into a
//! [`CompleteAction`] for the parent's step.

use crate::{
    identifiers::{DefinitionId, RunId, StepId},
    run::StepResult,
    trace::{
        TraceError, TraceMetadata, DEFINITION_ID, PARENT_METADATA, PARENT_RUN_ID, PARENT_STEP_ID,
        RUN_ID, STEP_ID,
    },
    workflows::CompleteAction,
};

/// Reference from a child run to the parent step that started it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Parent run
    pub run_id: RunId,
    /// Definition the parent run executes
    pub definition_id: DefinitionId,
    /// Parent step waiting on the child
    pub step_id: StepId,
    /// Metadata the parent step was dispatched with
    pub metadata: TraceMetadata,
}

impl ParentLink {
    /// Build a link from the metadata a parent step was dispatched with
    pub fn from_parent_trace(parent: &TraceMetadata) -> Result<Self, TraceError> {
        Ok(Self {
            run_id: parent.require(RUN_ID)?,
            definition_id: parent.require(DEFINITION_ID)?,
            step_id: parent.require(STEP_ID)?,
            metadata: parent.clone(),
        })
    }

    /// Parse the link recorded in a child's metadata, if there is one
    pub fn from_trace(trace: &TraceMetadata) -> Result<Option<Self>, TraceError> {
        if !trace.has_parent() {
            return Ok(None);
        }
        let metadata = trace
            .nested(PARENT_METADATA)?
            .ok_or(TraceError::MissingKey(PARENT_METADATA))?;

        Ok(Some(Self {
            run_id: trace.require(PARENT_RUN_ID)?,
            step_id: trace.require(PARENT_STEP_ID)?,
            definition_id: metadata.require(DEFINITION_ID)?,
            metadata,
        }))
    }

    /// Record the link in a child's metadata
    ///
    /// Replaces any link already present; an older ancestor stays reachable
    /// through the nested parent metadata.
    pub fn attach(&self, trace: &mut TraceMetadata) -> Result<(), TraceError> {
        trace.insert(PARENT_RUN_ID, self.run_id.to_string());
        trace.insert(PARENT_STEP_ID, self.step_id.to_string());
        trace.insert(PARENT_METADATA, self.metadata.to_json()?);
        Ok(())
    }

    /// Completion for the parent step carrying the child's result
    pub fn completion(&self, result: StepResult) -> CompleteAction {
        CompleteAction {
            run_id: self.run_id,
            definition_id: self.definition_id,
            step_id: self.step_id,
            result,
            trace: self.metadata.clone(),
        }
    }
}

/// Parent completion for a child that reported `result`, if it has a parent
pub fn parent_completion(
    trace: &TraceMetadata,
    result: &StepResult,
) -> Result<Option<CompleteAction>, TraceError> {
    Ok(ParentLink::from_trace(trace)?.map(|link| link.completion(result.clone())))
}
