// Copyright 2025 Cowboy AI, LLC.

//! ExecuteDefinition workflow
//!
//! Starts a definition as a step of another run. The child run is started
//! exactly like [`RunDefinition`](super::RunDefinition) but its metadata
//! carries a [`ParentLink`] to the parent step, so its completion flows
//! back to the parent instead of the notifier.

use crate::{
    definition::{load_valid_definition, DefinitionStore, Payload},
    errors::{RunError, RunResult},
    identifiers::{DefinitionId, RunId},
    nested::ParentLink,
    persistence::{RetryPolicy, SharedRunStore},
    run::{RunEvent, RunKey},
    trace::TraceMetadata,
    workflows::{run_definition::start_run, RunEventHandler},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Inbound request to run a definition on behalf of a parent step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteDefinitionRequest {
    /// Child run to start
    pub run_id: RunId,
    /// Definition the child executes
    pub definition_id: DefinitionId,
    /// Metadata the parent step was dispatched with
    pub parent_trace: TraceMetadata,
    /// Replaces the definition's initial input when present
    #[serde(default)]
    pub input: Option<Payload>,
}

impl ExecuteDefinitionRequest {
    /// Link to the parent step named by `parent_trace`
    pub fn parent_link(&self) -> RunResult<ParentLink> {
        ParentLink::from_parent_trace(&self.parent_trace)
            .map_err(|e| RunError::Validation(format!("invalid parent reference: {e}")))
    }
}

/// Starts child runs
pub struct ExecuteDefinition {
    definitions: Arc<dyn DefinitionStore>,
    runs: SharedRunStore,
    handler: Arc<RunEventHandler>,
    retry: RetryPolicy,
}

impl ExecuteDefinition {
    /// Create the workflow
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        runs: SharedRunStore,
        handler: Arc<RunEventHandler>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            definitions,
            runs,
            handler,
            retry,
        }
    }

    /// Start the child run, returning the `StepRunning` event if one was produced
    pub async fn execute(&self, request: ExecuteDefinitionRequest) -> RunResult<Option<RunEvent>> {
        let link = request.parent_link()?;
        let mut definition =
            load_valid_definition(self.definitions.as_ref(), &request.definition_id).await?;
        if let Some(input) = request.input {
            definition = definition.with_initial_input(input);
        }

        // The child inherits the parent's passthrough keys.
        let mut trace = request.parent_trace;
        link.attach(&mut trace)
            .map_err(|e| RunError::Validation(e.to_string()))?;

        info!(
            run_id = %request.run_id,
            parent_run_id = %link.run_id,
            parent_step_id = %link.step_id,
            "Starting nested definition"
        );

        start_run(
            &self.runs,
            &self.handler,
            self.retry,
            RunKey::new(request.run_id, request.definition_id),
            definition,
            trace,
        )
        .await
    }
}
