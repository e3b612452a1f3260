// Copyright 2025 Cowboy AI, LLC.

//! CompleteStep workflow
//!
//! Completions arrive at least once and possibly out of order. The claimed
//! step id is matched against the current snapshot and the first strategy
//! that fits is applied:
//!
//! 1. **Direct**: it is the running step. Complete it, then advance.
//! 2. **Re-advance**: it is the last completed step and nothing is running.
//!    Advance again; `RunNextStep` re-derives from history.
//! 3. **Self-heal**: it is the last completed step but another step is
//!    running. Cancel that step, then advance.
//!
//! Anything else is a stale or duplicate report and is absorbed. A
//! duplicate of the completion that finished the run reports the final
//! result again, to the parent or the notifier, since the first report may
//! have been lost along with its compensation write.

use crate::{
    errors::{RunError, RunResult},
    identifiers::{DefinitionId, RunId, StepId},
    persistence::{mutate_versioned, Decision, RetryPolicy, SharedRunStore},
    run::{RunAggregate, RunCommand, RunEvent, RunKey, StepResult},
    trace::TraceMetadata,
    workflows::{
        apply_commands, outward_transition, DispatchStage, EventHandler, RunEventHandler,
        RunTransition,
    },
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Inbound report that a dispatched step finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteAction {
    /// Run the step belongs to
    pub run_id: RunId,
    /// Definition the run executes
    pub definition_id: DefinitionId,
    /// Step the report claims to complete
    pub step_id: StepId,
    /// Outcome of the step
    pub result: StepResult,
    /// Metadata echoed back by the worker
    #[serde(default)]
    pub trace: TraceMetadata,
}

impl CompleteAction {
    /// Key of the targeted run
    pub fn key(&self) -> RunKey {
        RunKey::new(self.run_id, self.definition_id)
    }
}

/// How a completion was absorbed into the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStrategy {
    /// Completed the running step and advanced
    Direct,
    /// Advanced again from the last completed step
    ReAdvance,
    /// Canceled a stuck step and advanced
    SelfHeal,
}

impl CompletionStrategy {
    /// Pick the strategy that fits `claimed` against the snapshot
    pub fn select(aggregate: &RunAggregate, claimed: StepId) -> Option<Self> {
        let running = aggregate.running_step_id();
        if running == Some(claimed) {
            return Some(CompletionStrategy::Direct);
        }
        if aggregate.recent_completed_step_id() != Some(claimed) {
            return None;
        }
        match running {
            None => Some(CompletionStrategy::ReAdvance),
            Some(_) => Some(CompletionStrategy::SelfHeal),
        }
    }

    /// Commands the strategy applies
    pub fn commands(&self, result: &StepResult) -> Vec<RunCommand> {
        match self {
            CompletionStrategy::Direct => vec![
                RunCommand::CompleteRunningStep {
                    result: result.clone(),
                },
                RunCommand::RunNextStep,
            ],
            CompletionStrategy::ReAdvance => vec![RunCommand::RunNextStep],
            CompletionStrategy::SelfHeal => {
                vec![RunCommand::CancelRunningStep, RunCommand::RunNextStep]
            }
        }
    }
}

/// What a completion did
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionOutcome {
    /// Strategy applied, `None` if the report was absorbed
    pub strategy: Option<CompletionStrategy>,
    /// Events persisted
    pub events: Vec<RunEvent>,
    /// Completion to deliver to a parent run
    pub follow_up: Option<CompleteAction>,
}

impl CompletionOutcome {
    /// Whether the report changed nothing
    pub fn is_absorbed(&self) -> bool {
        self.events.is_empty()
    }
}

enum Attempt {
    Absent,
    Absorbed {
        /// Final result of a run that had already completed on this step
        completed: Option<StepResult>,
    },
    Applied(CompletionStrategy, Vec<RunEvent>),
}

/// Absorbs completion reports
pub struct CompleteStep {
    runs: SharedRunStore,
    handler: Arc<RunEventHandler>,
    retry: RetryPolicy,
}

impl CompleteStep {
    /// Create the workflow
    pub fn new(runs: SharedRunStore, handler: Arc<RunEventHandler>, retry: RetryPolicy) -> Self {
        Self {
            runs,
            handler,
            retry,
        }
    }

    /// Apply a completion report
    pub async fn execute(&self, action: CompleteAction) -> RunResult<CompletionOutcome> {
        let key = action.key();

        let attempt = mutate_versioned(self.runs.as_ref(), &key, self.retry, |current| {
            let Some(current) = current else {
                return Decision::Skip(Attempt::Absent);
            };
            let absorbed = || Attempt::Absorbed {
                completed: completed_on(current, action.step_id),
            };
            let Some(strategy) = CompletionStrategy::select(current, action.step_id) else {
                return Decision::Skip(absorbed());
            };
            match apply_commands(current, &strategy.commands(&action.result)) {
                Decision::Write { aggregate, output } => Decision::Write {
                    aggregate,
                    output: Attempt::Applied(strategy, output),
                },
                Decision::Skip(_) => Decision::Skip(absorbed()),
            }
        })
        .await?;

        match attempt {
            Attempt::Absent => Err(RunError::NotFound {
                run_id: action.run_id,
                definition_id: action.definition_id,
            }),
            Attempt::Absorbed { completed } => {
                debug!(
                    run_id = %action.run_id,
                    step_id = %action.step_id,
                    "Stale or duplicate completion, absorbed"
                );
                let follow_up = match completed {
                    Some(result) => {
                        info!(
                            run_id = %action.run_id,
                            step_id = %action.step_id,
                            "Final completion redelivered, reporting result again"
                        );
                        self.handler
                            .handle(RunTransition {
                                key,
                                event: RunEvent::DefinitionCompleted { result },
                                stage: DispatchStage::Next,
                                trace: action.trace.clone(),
                            })
                            .await?
                    }
                    None => None,
                };
                Ok(CompletionOutcome {
                    strategy: None,
                    events: Vec::new(),
                    follow_up,
                })
            }
            Attempt::Applied(strategy, events) => {
                info!(
                    run_id = %action.run_id,
                    step_id = %action.step_id,
                    strategy = ?strategy,
                    events = events.len(),
                    "Completion applied"
                );
                let follow_up = match outward_transition(&events) {
                    Some(event) => {
                        self.handler
                            .handle(RunTransition {
                                key,
                                event: event.clone(),
                                stage: DispatchStage::Next,
                                trace: action.trace.clone(),
                            })
                            .await?
                    }
                    None => None,
                };
                Ok(CompletionOutcome {
                    strategy: Some(strategy),
                    events,
                    follow_up,
                })
            }
        }
    }
}

/// Final result if the run completed with `step_id` as its last step
///
/// A run failed after completing has already given up on reporting.
fn completed_on(aggregate: &RunAggregate, step_id: StepId) -> Option<StepResult> {
    if aggregate.is_failed() || aggregate.recent_completed_step_id() != Some(step_id) {
        return None;
    }
    aggregate.events().iter().rev().find_map(|event| match event {
        RunEvent::DefinitionCompleted { result } => Some(result.clone()),
        _ => None,
    })
}
