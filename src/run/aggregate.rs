// Copyright 2025 Cowboy AI, LLC.

//! Run aggregate
//!
//! The per-run, event-sourced state machine. It is keyed by the pair
//! (run id, definition id) and stores nothing but its ordered event history.
//! Two projections are maintained while folding the history:
//!
//! - `running_step_id`: the step currently in flight, if any
//! - `recent_completed_step_id`: the step that completed most recently
//!
//! [`RunAggregate::handle`] decides, [`RunAggregate::apply`] folds. Handling
//! never suspends and never fails: a command either yields one event or is
//! rejected by a guard and yields `None`.

use crate::{
    definition::Definition,
    identifiers::{DefinitionId, RunId, StepId},
    run::{RunCommand, RunEvent, RunState, StepResult},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a run aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    /// The run
    pub run_id: RunId,
    /// The definition the run executes
    pub definition_id: DefinitionId,
}

impl RunKey {
    /// Create a key
    pub fn new(run_id: RunId, definition_id: DefinitionId) -> Self {
        Self {
            run_id,
            definition_id,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.definition_id)
    }
}

/// Serialized form of a run aggregate: identity plus history
#[derive(Serialize, Deserialize)]
struct RunHistory {
    run_id: RunId,
    definition_id: DefinitionId,
    events: Vec<RunEvent>,
}

/// Event-sourced state machine for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RunHistory", into = "RunHistory")]
pub struct RunAggregate {
    key: RunKey,
    events: Vec<RunEvent>,
    running_step_id: Option<StepId>,
    recent_completed_step_id: Option<StepId>,
}

impl From<RunHistory> for RunAggregate {
    fn from(history: RunHistory) -> Self {
        RunAggregate::from_events(
            RunKey::new(history.run_id, history.definition_id),
            history.events,
        )
    }
}

impl From<RunAggregate> for RunHistory {
    fn from(aggregate: RunAggregate) -> Self {
        RunHistory {
            run_id: aggregate.key.run_id,
            definition_id: aggregate.key.definition_id,
            events: aggregate.events,
        }
    }
}

impl RunAggregate {
    /// Create an aggregate with an empty history
    pub fn new(key: RunKey) -> Self {
        Self {
            key,
            events: Vec::new(),
            running_step_id: None,
            recent_completed_step_id: None,
        }
    }

    /// Rebuild an aggregate by replaying its history
    pub fn from_events(key: RunKey, events: impl IntoIterator<Item = RunEvent>) -> Self {
        events.into_iter().fold(Self::new(key), |mut aggregate, event| {
            aggregate.apply(event);
            aggregate
        })
    }

    /// Aggregate identity
    pub fn key(&self) -> RunKey {
        self.key
    }

    /// The run id
    pub fn run_id(&self) -> RunId {
        self.key.run_id
    }

    /// The definition id
    pub fn definition_id(&self) -> DefinitionId {
        self.key.definition_id
    }

    /// Full ordered history
    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Step currently in flight
    pub fn running_step_id(&self) -> Option<StepId> {
        self.running_step_id
    }

    /// Step that completed most recently
    pub fn recent_completed_step_id(&self) -> Option<StepId> {
        self.recent_completed_step_id
    }

    /// Definition bound by the first event
    pub fn definition(&self) -> Option<&Definition> {
        match self.events.first() {
            Some(RunEvent::DefinitionAdded { definition }) => Some(definition),
            _ => None,
        }
    }

    /// Number of `StepCompleted` events so far
    pub fn completed_step_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, RunEvent::StepCompleted { .. }))
            .count()
    }

    /// Result recorded by the most recent `StepCompleted`
    pub fn recent_completed_result(&self) -> Option<&StepResult> {
        self.events.iter().rev().find_map(|event| match event {
            RunEvent::StepCompleted { result, .. } => Some(result),
            _ => None,
        })
    }

    /// Whether a `Failed` event has been recorded
    pub fn is_failed(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, RunEvent::Failed { .. }))
    }

    /// Whether a `DefinitionCompleted` event has been recorded
    pub fn is_definition_completed(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, RunEvent::DefinitionCompleted { .. }))
    }

    /// Lifecycle state read off the history
    pub fn state(&self) -> RunState {
        if self.events.is_empty() {
            RunState::NoDefinition
        } else if self.is_failed() {
            RunState::Failed
        } else if self.is_definition_completed() {
            RunState::DefinitionCompleted
        } else if self.running_step_id.is_some() {
            RunState::StepRunning
        } else if self.events.iter().any(|event| event.step_id().is_some()) {
            RunState::StepSettled
        } else {
            RunState::DefinitionSet
        }
    }

    /// Decide which event, if any, a command produces
    ///
    /// Only `RunFirstStep` and `RunNextStep` consult randomness, to mint a
    /// fresh step id. Everything else is a function of the history.
    pub fn handle(&self, command: &RunCommand) -> Option<RunEvent> {
        // A failed run only accepts another Fail.
        if self.is_failed() && !matches!(command, RunCommand::Fail { .. }) {
            return None;
        }

        match command {
            RunCommand::SetDefinition(definition) => {
                self.events.is_empty().then(|| RunEvent::DefinitionAdded {
                    definition: definition.clone(),
                })
            }
            RunCommand::RunFirstStep => self.first_step(),
            RunCommand::CancelRunningStep => self
                .running_step_id
                .map(|step_id| RunEvent::StepCanceled { step_id }),
            RunCommand::FailRunningStep { error } => {
                self.running_step_id.map(|step_id| RunEvent::StepFailed {
                    step_id,
                    error: error.clone(),
                })
            }
            RunCommand::CompleteRunningStep { result } => {
                self.running_step_id.map(|step_id| RunEvent::StepCompleted {
                    step_id,
                    result: result.clone(),
                })
            }
            RunCommand::RunNextStep => self.next_step(),
            RunCommand::Fail { error } => Some(RunEvent::Failed {
                error: error.clone(),
            }),
        }
    }

    /// Fold one event into the aggregate
    pub fn apply(&mut self, event: RunEvent) {
        match &event {
            RunEvent::StepRunning { step_id, .. } => {
                self.running_step_id = Some(*step_id);
            }
            RunEvent::StepCanceled { .. } | RunEvent::StepFailed { .. } => {
                self.running_step_id = None;
            }
            RunEvent::StepCompleted { step_id, .. } => {
                self.running_step_id = None;
                self.recent_completed_step_id = Some(*step_id);
            }
            RunEvent::DefinitionAdded { .. }
            | RunEvent::DefinitionCompleted { .. }
            | RunEvent::Failed { .. } => {}
        }
        self.events.push(event);
    }

    /// Handle a command and fold the resulting event in
    pub fn execute(&mut self, command: &RunCommand) -> Option<RunEvent> {
        let event = self.handle(command)?;
        self.apply(event.clone());
        Some(event)
    }

    /// Execute commands in order, collecting the events they produced
    ///
    /// Stops at the first command a guard rejects.
    pub fn execute_all<'a>(
        &mut self,
        commands: impl IntoIterator<Item = &'a RunCommand>,
    ) -> Vec<RunEvent> {
        let mut produced = Vec::new();
        for command in commands {
            match self.execute(command) {
                Some(event) => produced.push(event),
                None => break,
            }
        }
        produced
    }

    fn first_step(&self) -> Option<RunEvent> {
        let definition = self.definition()?;
        if self.running_step_id.is_some()
            || self.recent_completed_step_id.is_some()
            || self.is_definition_completed()
        {
            return None;
        }
        let step = definition.step(0)?;
        Some(RunEvent::StepRunning {
            step_id: StepId::new(),
            step: step.clone(),
            input: definition.initial_input.clone(),
        })
    }

    fn next_step(&self) -> Option<RunEvent> {
        if self.running_step_id.is_some()
            || self.recent_completed_step_id.is_none()
            || self.is_definition_completed()
        {
            return None;
        }
        let definition = self.definition()?;
        let result = self.recent_completed_result()?;

        // A non-Data result finishes the definition wherever it occurs.
        match (definition.step(self.completed_step_count()), result) {
            (Some(next), StepResult::Data(payload)) => Some(RunEvent::StepRunning {
                step_id: StepId::new(),
                step: next.clone(),
                input: payload.clone(),
            }),
            _ => Some(RunEvent::DefinitionCompleted {
                result: result.clone(),
            }),
        }
    }
}
