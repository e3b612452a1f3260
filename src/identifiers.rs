// Copyright 2025 Cowboy AI, LLC.

//! Identifier types for runs, definitions, steps and tasks
//!
//! All identifiers are UUID newtypes. They travel through trace metadata as
//! their hyphenated string form, so each one parses back with [`FromStr`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from a UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Get the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_identifier!(
    /// Run ID - one execution of a definition
    ///
    /// Supplied by whoever starts the run. Together with a [`DefinitionId`]
    /// it keys the run aggregate.
    RunId
);

uuid_identifier!(
    /// Definition ID - identifies an immutable definition in the definition store
    DefinitionId
);

uuid_identifier!(
    /// Step ID - one dispatch of one step
    ///
    /// A fresh value is generated every time a step starts running and is
    /// never reused, so a stale or duplicated completion can always be told
    /// apart from the live one.
    StepId
);

uuid_identifier!(
    /// Task ID - opaque correlation handle carried in trace metadata
    TaskId
);
