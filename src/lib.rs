// Copyright 2025 Cowboy AI, LLC.

//! # CIM Saga
//!
//! Coordination of multi-step definitions whose steps execute out of
//! process and report back over an at-least-once channel.
//!
//! This crate provides:
//! - **Run Aggregate**: the event-sourced per-run state machine
//! - **Versioned Persistence**: optimistic-concurrency read-decide-write
//! - **Orchestration Workflows**: RunDefinition, CompleteStep, ExecuteDefinition
//! - **Nested Linkage**: child runs completing their parent's step
//! - **Coordinator**: routing of inbound commands with a delivery disposition
//!
//! ## Design Principles
//!
//! 1. **Guards, not errors**: a rejected command yields no event
//! 2. **Append-only history**: outward failures are compensated forward
//! 3. **Idempotent delivery**: duplicates and stale reports are absorbed
//! 4. **Injected collaborators**: no global stores

#![warn(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod definition;
pub mod errors;
pub mod identifiers;
pub mod nested;
pub mod persistence;
pub mod run;
pub mod trace;
pub mod workflows;

// Re-export core types
pub use collaborators::{ActionDispatcher, ActionRequest, CompletionNotifier, DispatchError};
pub use config::CoordinatorConfig;
pub use coordinator::{Disposition, InboundCommand, RunCoordinator};
pub use definition::{
    CachedDefinitionStore, Definition, DefinitionStore, InMemoryDefinitionStore, Payload,
    StepSpec,
};
pub use errors::{RunError, RunResult};
pub use identifiers::{DefinitionId, RunId, StepId, TaskId};
pub use nested::{parent_completion, ParentLink};
pub use persistence::{
    mutate_versioned, Decision, InMemoryRunStore, MutateError, NatsKvConfig, NatsKvRunStore,
    NatsKvRunStoreBuilder, RetryPolicy, SharedRunStore, StoreError, Versioned, VersionedStore,
};
pub use run::{RunAggregate, RunCommand, RunEvent, RunKey, RunState, State, StepResult};
pub use trace::{TraceError, TraceMetadata};
pub use workflows::{
    CompleteAction, CompleteStep, CompletionOutcome, CompletionStrategy, ExecuteDefinition,
    ExecuteDefinitionRequest, RunDefinition, RunDefinitionRequest, RunEventHandler,
};
