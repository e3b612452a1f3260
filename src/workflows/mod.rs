// Copyright 2025 Cowboy AI, LLC.

//! # Orchestration Workflows
//!
//! Each workflow mutates one run aggregate through the versioned
//! persistence discipline and then makes at most one outward call for the
//! transition it produced:
//!
//! - **RunDefinition**: bind a definition and start its first step
//! - **CompleteStep**: absorb a completion report and advance
//! - **ExecuteDefinition**: start a definition as a step of another run
//!
//! Outward call failures are compensated forward by the
//! [`RunEventHandler`] before the error is returned.

pub mod complete_step;
pub mod event_handler;
pub mod execute_definition;
pub mod run_definition;

pub use complete_step::{CompleteAction, CompleteStep, CompletionOutcome, CompletionStrategy};
pub use event_handler::{DispatchStage, EventHandler, RunEventHandler, RunTransition};
pub use execute_definition::{ExecuteDefinition, ExecuteDefinitionRequest};
pub use run_definition::{RunDefinition, RunDefinitionRequest};

use crate::{
    persistence::Decision,
    run::{RunAggregate, RunCommand, RunEvent},
};

/// Run `commands` against a copy of `current`
///
/// Writes only if at least one event was produced.
pub(crate) fn apply_commands(
    current: &RunAggregate,
    commands: &[RunCommand],
) -> Decision<RunAggregate, Vec<RunEvent>> {
    let mut next = current.clone();
    let events = next.execute_all(commands);
    if events.is_empty() {
        Decision::Skip(events)
    } else {
        Decision::Write {
            aggregate: next,
            output: events,
        }
    }
}

/// The last event in `events` that needs an outward call
pub(crate) fn outward_transition(events: &[RunEvent]) -> Option<&RunEvent> {
    events.iter().rev().find(|event| {
        matches!(
            event,
            RunEvent::StepRunning { .. } | RunEvent::DefinitionCompleted { .. }
        )
    })
}
