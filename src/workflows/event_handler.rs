// Copyright 2025 Cowboy AI, LLC.

//! Reacting to run transitions
//!
//! A new `StepRunning` is dispatched to a worker and a `DefinitionCompleted`
//! is reported to the notifier, or to the parent run when there is one. If
//! the outward call fails, the aggregate is compensated so it never claims
//! a step is in flight that nobody is working on.

use crate::{
    collaborators::{ActionDispatcher, ActionRequest, CompletionNotifier},
    errors::{RunError, RunResult},
    identifiers::StepId,
    nested,
    persistence::{mutate_versioned, Decision, RetryPolicy, SharedRunStore},
    run::{RunCommand, RunEvent, RunKey, StepResult},
    trace::TraceMetadata,
    workflows::{apply_commands, CompleteAction},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait for handling run transitions
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    /// Value handed back to the caller
    type Output;
    /// Error type for this handler
    type Error;

    /// Handle one event
    async fn handle(&self, event: E) -> Result<Self::Output, Self::Error>;
}

/// Which workflow produced a `StepRunning`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    /// Started by `RunFirstStep`
    First,
    /// Started by `RunNextStep`
    Next,
}

/// A persisted event plus the context needed to act on it
#[derive(Debug, Clone)]
pub struct RunTransition {
    /// Run the event belongs to
    pub key: RunKey,
    /// The event
    pub event: RunEvent,
    /// Which workflow produced it
    pub stage: DispatchStage,
    /// Metadata of the inbound message
    pub trace: TraceMetadata,
}

/// Makes the outward call for a transition and compensates on failure
pub struct RunEventHandler {
    dispatcher: Arc<dyn ActionDispatcher>,
    notifier: Arc<dyn CompletionNotifier>,
    runs: SharedRunStore,
    retry: RetryPolicy,
}

impl RunEventHandler {
    /// Create a handler
    pub fn new(
        dispatcher: Arc<dyn ActionDispatcher>,
        notifier: Arc<dyn CompletionNotifier>,
        runs: SharedRunStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            notifier,
            runs,
            retry,
        }
    }

    async fn dispatch_step(&self, transition: &RunTransition) -> RunResult<()> {
        let RunEvent::StepRunning {
            step_id,
            step,
            input,
        } = &transition.event
        else {
            return Ok(());
        };
        let key = transition.key;

        let request = ActionRequest {
            run_id: key.run_id,
            definition_id: key.definition_id,
            step_id: *step_id,
            input: input.clone(),
            config: step.config.clone(),
            trace: transition
                .trace
                .stamped(key.run_id, key.definition_id, *step_id),
        };

        match self.dispatcher.dispatch(&step.name, request).await {
            Ok(()) => {
                info!(
                    run_id = %key.run_id,
                    step_id = %step_id,
                    step = %step.name,
                    "Dispatched step"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    run_id = %key.run_id,
                    step_id = %step_id,
                    step = %step.name,
                    error = %message,
                    "Step dispatch failed, failing step"
                );
                self.fail_step(key, *step_id, &message).await?;

                Err(match transition.stage {
                    DispatchStage::First => RunError::RunFirstStepFailure {
                        step_id: *step_id,
                        message,
                    },
                    DispatchStage::Next => RunError::RunNextStepFailure {
                        step_id: *step_id,
                        message,
                    },
                })
            }
        }
    }

    /// Fail `step_id`, but only while it is still the running step
    async fn fail_step(&self, key: RunKey, step_id: StepId, message: &str) -> RunResult<()> {
        let command = RunCommand::FailRunningStep {
            error: message.to_string(),
        };

        let compensated = mutate_versioned(self.runs.as_ref(), &key, self.retry, |current| {
            match current {
                Some(current) if current.running_step_id() == Some(step_id) => {
                    apply_commands(current, std::slice::from_ref(&command))
                }
                _ => Decision::Skip(Vec::new()),
            }
        })
        .await;

        match compensated {
            Ok(events) if events.is_empty() => {
                debug!(run_id = %key.run_id, step_id = %step_id, "Step moved on, nothing to fail");
                Ok(())
            }
            Ok(_) => {
                info!(run_id = %key.run_id, step_id = %step_id, "Failed step after dispatch error");
                Ok(())
            }
            Err(e) => {
                error!(
                    run_id = %key.run_id,
                    step_id = %step_id,
                    error = %e,
                    "Compensation write failed"
                );
                Err(e.into())
            }
        }
    }

    async fn complete_definition(
        &self,
        transition: &RunTransition,
    ) -> RunResult<Option<CompleteAction>> {
        let RunEvent::DefinitionCompleted { result } = &transition.event else {
            return Ok(None);
        };
        let key = transition.key;

        match nested::parent_completion(&transition.trace, result) {
            Ok(Some(action)) => {
                info!(
                    run_id = %key.run_id,
                    parent_run_id = %action.run_id,
                    parent_step_id = %action.step_id,
                    result = result.kind(),
                    "Definition completed, reporting to parent"
                );
                return Ok(Some(action));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    run_id = %key.run_id,
                    error = %e,
                    "Unreadable parent link, notifying instead"
                );
            }
        }

        match self
            .notifier
            .notify_completed(key.run_id, key.definition_id, result, &transition.trace)
            .await
        {
            Ok(()) => {
                info!(run_id = %key.run_id, result = result.kind(), "Definition completed");
                Ok(None)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    run_id = %key.run_id,
                    error = %message,
                    "Completion notification failed, failing run"
                );
                self.fail_run(key, &message).await?;
                Err(RunError::CompleteDefinitionFailure { message })
            }
        }
    }

    async fn fail_run(&self, key: RunKey, message: &str) -> RunResult<()> {
        let command = RunCommand::Fail {
            error: message.to_string(),
        };

        mutate_versioned(self.runs.as_ref(), &key, self.retry, |current| match current {
            Some(current) if !current.is_failed() => {
                apply_commands(current, std::slice::from_ref(&command))
            }
            _ => Decision::Skip(Vec::new()),
        })
        .await
        .map_err(|e| {
            error!(run_id = %key.run_id, error = %e, "Compensation write failed");
            RunError::from(e)
        })?;

        info!(run_id = %key.run_id, "Failed run after notification error");
        Ok(())
    }
}

#[async_trait]
impl EventHandler<RunTransition> for RunEventHandler {
    type Output = Option<CompleteAction>;
    type Error = RunError;

    async fn handle(&self, transition: RunTransition) -> RunResult<Option<CompleteAction>> {
        match &transition.event {
            RunEvent::StepRunning { .. } => {
                self.dispatch_step(&transition).await?;
                Ok(None)
            }
            RunEvent::DefinitionCompleted { .. } => self.complete_definition(&transition).await,
            RunEvent::DefinitionAdded { .. }
            | RunEvent::StepCanceled { .. }
            | RunEvent::StepFailed { .. }
            | RunEvent::StepCompleted { .. }
            | RunEvent::Failed { .. } => Ok(None),
        }
    }
}

/// Error result reported to a parent when its child could not go on
pub(crate) fn child_failure(err: &RunError) -> StepResult {
    StepResult::Error(err.to_string())
}
