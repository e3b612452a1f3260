// Copyright 2025 Cowboy AI, LLC.

//! Run aggregate: events, commands, derived states and the state machine

pub mod aggregate;
pub mod commands;
pub mod events;
pub mod state;

pub use aggregate::{RunAggregate, RunKey};
pub use commands::RunCommand;
pub use events::{RunEvent, StepResult};
pub use state::{RunState, State};
