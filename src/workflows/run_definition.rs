// Copyright 2025 Cowboy AI, LLC.

//! RunDefinition workflow
//!
//! Binds a definition to a run and starts its first step. Starting an
//! already-started run does not start a second first step. While that step
//! is still running and nothing has completed, the recorded `StepRunning`
//! is dispatched again: the earlier dispatch may have been lost together
//! with its compensation write. Once a step has completed the start is
//! absorbed.

use crate::{
    definition::{load_valid_definition, Definition, DefinitionStore},
    errors::RunResult,
    identifiers::{DefinitionId, RunId},
    persistence::{mutate_versioned, Decision, RetryPolicy, SharedRunStore},
    run::{RunAggregate, RunCommand, RunEvent, RunKey},
    trace::TraceMetadata,
    workflows::{apply_commands, DispatchStage, EventHandler, RunEventHandler, RunTransition},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Inbound request to start a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDefinitionRequest {
    /// Run to start
    pub run_id: RunId,
    /// Definition to execute
    pub definition_id: DefinitionId,
    /// Metadata of the inbound message
    #[serde(default)]
    pub trace: TraceMetadata,
}

/// Starts runs
pub struct RunDefinition {
    definitions: Arc<dyn DefinitionStore>,
    runs: SharedRunStore,
    handler: Arc<RunEventHandler>,
    retry: RetryPolicy,
}

impl RunDefinition {
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

    /// Start the run, returning the `StepRunning` event if one was produced
    pub async fn execute(&self, request: RunDefinitionRequest) -> RunResult<Option<RunEvent>> {
        let definition =
            load_valid_definition(self.definitions.as_ref(), &request.definition_id).await?;
        let key = RunKey::new(request.run_id, request.definition_id);

        start_run(
            &self.runs,
            &self.handler,
            self.retry,
            key,
            definition,
            request.trace,
        )
        .await
    }
}

enum FirstStep {
    Started(RunEvent),
    Pending(RunEvent),
    Absorbed,
}

/// Bind (if needed) and start the first step, then dispatch it
pub(crate) async fn start_run(
    runs: &SharedRunStore,
    handler: &RunEventHandler,
    retry: RetryPolicy,
    key: RunKey,
    definition: Definition,
    trace: TraceMetadata,
) -> RunResult<Option<RunEvent>> {
    let bind_and_start = [
        RunCommand::SetDefinition(definition),
        RunCommand::RunFirstStep,
    ];

    let first_step = mutate_versioned(runs.as_ref(), &key, retry, |current| {
        let decision = match current {
            Some(current) => apply_commands(current, &bind_and_start[1..]),
            None => apply_commands(&RunAggregate::new(key), &bind_and_start),
        };
        match decision {
            Decision::Write { aggregate, output } => match started_by(output) {
                Some(event) => Decision::Write {
                    aggregate,
                    output: FirstStep::Started(event),
                },
                None => Decision::Skip(FirstStep::Absorbed),
            },
            Decision::Skip(_) => {
                let pending = current.and_then(pending_first_step).cloned();
                Decision::Skip(pending.map_or(FirstStep::Absorbed, FirstStep::Pending))
            }
        }
    })
    .await?;

    let started = match first_step {
        FirstStep::Started(event) => event,
        FirstStep::Pending(event) => {
            info!(
                run_id = %key.run_id,
                step_id = ?event.step_id(),
                "First step still running, dispatching again"
            );
            event
        }
        FirstStep::Absorbed => {
            debug!(run_id = %key.run_id, "Run already started, absorbed");
            return Ok(None);
        }
    };

    handler
        .handle(RunTransition {
            key,
            event: started.clone(),
            stage: DispatchStage::First,
            trace,
        })
        .await?;

    Ok(Some(started))
}

fn started_by(events: Vec<RunEvent>) -> Option<RunEvent> {
    events
        .into_iter()
        .rev()
        .find(|event| matches!(event, RunEvent::StepRunning { .. }))
}

/// The `StepRunning` of a first step that is still in flight
fn pending_first_step(aggregate: &RunAggregate) -> Option<&RunEvent> {
    let running = aggregate.running_step_id()?;
    if aggregate.is_failed() || aggregate.completed_step_count() > 0 {
        return None;
    }
    aggregate.events().iter().rev().find(|event| {
        matches!(event, RunEvent::StepRunning { step_id, .. } if *step_id == running)
    })
}
