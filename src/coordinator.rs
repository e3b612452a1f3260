// Copyright 2025 Cowboy AI, LLC.

//! Inbound command routing
//!
//! [`RunCoordinator`] is what a message consumer calls for every inbound
//! message. It runs the matching workflow, follows any completion owed to a
//! parent run until the chain settles, and tells the consumer whether to
//! acknowledge, drop or redeliver the message.

use crate::{
    collaborators::{ActionDispatcher, CompletionNotifier},
    config::CoordinatorConfig,
    definition::{CachedDefinitionStore, DefinitionStore},
    errors::{RunError, RunResult},
    nested,
    persistence::SharedRunStore,
    workflows::{
        event_handler::child_failure, CompleteAction, CompleteStep, ExecuteDefinition,
        ExecuteDefinitionRequest, RunDefinition, RunDefinitionRequest, RunEventHandler,
    },
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the consumer should do with an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    /// Handled; acknowledge
    Ack,
    /// Nothing more can be done; acknowledge without retrying
    Drop,
    /// Storage faulted; redeliver the message later
    Redeliver,
}

/// Messages the coordinator accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum InboundCommand {
    /// Start a run
    RunDefinition(RunDefinitionRequest),
    /// Report a finished step
    CompleteAction(CompleteAction),
    /// Start a run on behalf of a parent step
    ExecuteDefinition(ExecuteDefinitionRequest),
}

impl InboundCommand {
    /// Command name for logging
    pub fn name(&self) -> &'static str {
        match self {
            InboundCommand::RunDefinition(_) => "RunDefinition",
            InboundCommand::CompleteAction(_) => "CompleteAction",
            InboundCommand::ExecuteDefinition(_) => "ExecuteDefinition",
        }
    }
}

/// Outcome of one workflow invocation
struct Hop {
    outcome: RunResult<()>,
    follow_up: Option<CompleteAction>,
}

/// Routes inbound commands to the workflows
pub struct RunCoordinator {
    run_definition: RunDefinition,
    complete_step: CompleteStep,
    execute_definition: ExecuteDefinition,
}

impl RunCoordinator {
    /// Wire the workflows to their collaborators
    pub fn new(
        config: CoordinatorConfig,
        definitions: Arc<dyn DefinitionStore>,
        runs: SharedRunStore,
        dispatcher: Arc<dyn ActionDispatcher>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        let definitions: Arc<dyn DefinitionStore> =
            match NonZeroUsize::new(config.definition_cache_size) {
                Some(capacity) => Arc::new(CachedDefinitionStore::new(definitions, capacity)),
                None => definitions,
            };
        let handler = Arc::new(RunEventHandler::new(
            dispatcher,
            notifier,
            runs.clone(),
            config.retry,
        ));

        Self {
            run_definition: RunDefinition::new(
                definitions.clone(),
                runs.clone(),
                handler.clone(),
                config.retry,
            ),
            complete_step: CompleteStep::new(runs.clone(), handler.clone(), config.retry),
            execute_definition: ExecuteDefinition::new(definitions, runs, handler, config.retry),
        }
    }

    /// The RunDefinition workflow
    pub fn run_definition(&self) -> &RunDefinition {
        &self.run_definition
    }

    /// The CompleteStep workflow
    pub fn complete_step(&self) -> &CompleteStep {
        &self.complete_step
    }

    /// The ExecuteDefinition workflow
    pub fn execute_definition(&self) -> &ExecuteDefinition {
        &self.execute_definition
    }

    /// Handle one inbound message and every parent completion it causes
    ///
    /// The disposition is that of the inbound message itself, except that a
    /// storage fault while handing off to a parent also asks for
    /// redelivery: the redelivered message re-derives the handoff.
    pub async fn handle(&self, command: InboundCommand) -> Disposition {
        let mut disposition = Disposition::Ack;
        let mut next = Some(command);
        let mut depth = 0usize;

        while let Some(command) = next.take() {
            let name = command.name();
            let hop = self.process(command).await;

            if let Err(err) = &hop.outcome {
                let hop_disposition = err.disposition();
                match hop_disposition {
                    Disposition::Redeliver => {
                        warn!(command = name, depth, error = %err, "Storage fault, redelivering");
                    }
                    _ => debug!(command = name, depth, error = %err, "Command not applied"),
                }
                if depth == 0 || hop_disposition == Disposition::Redeliver {
                    disposition = hop_disposition;
                }
            }

            if let Some(follow_up) = &hop.follow_up {
                info!(
                    parent_run_id = %follow_up.run_id,
                    parent_step_id = %follow_up.step_id,
                    result = follow_up.result.kind(),
                    "Completing parent step"
                );
            }
            next = hop.follow_up.map(InboundCommand::CompleteAction);
            depth += 1;
        }

        disposition
    }

    async fn process(&self, command: InboundCommand) -> Hop {
        match command {
            InboundCommand::RunDefinition(request) => Hop {
                outcome: self.run_definition.execute(request).await.map(|_| ()),
                follow_up: None,
            },
            InboundCommand::CompleteAction(action) => {
                let trace = action.trace.clone();
                match self.complete_step.execute(action).await {
                    Ok(outcome) => Hop {
                        outcome: Ok(()),
                        follow_up: outcome.follow_up,
                    },
                    Err(err) => {
                        let follow_up = match &err {
                            RunError::RunNextStepFailure { .. } => {
                                nested::parent_completion(&trace, &child_failure(&err))
                                    .ok()
                                    .flatten()
                            }
                            _ => None,
                        };
                        Hop {
                            outcome: Err(err),
                            follow_up,
                        }
                    }
                }
            }
            InboundCommand::ExecuteDefinition(request) => {
                let link = request.parent_link();
                match self.execute_definition.execute(request).await {
                    Ok(_) => Hop {
                        outcome: Ok(()),
                        follow_up: None,
                    },
                    Err(err) => {
                        let follow_up = match (&err, link) {
                            (
                                RunError::DefinitionNotFound(_)
                                | RunError::Validation(_)
                                | RunError::RunFirstStepFailure { .. },
                                Ok(link),
                            ) => Some(link.completion(child_failure(&err))),
                            _ => None,
                        };
                        Hop {
                            outcome: Err(err),
                            follow_up,
                        }
                    }
                }
            }
        }
    }
}
