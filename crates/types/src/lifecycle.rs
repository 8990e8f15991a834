//! Federate lifecycle states.

use sbor::prelude::BasicSbor;
use std::fmt;

/// Lifecycle of a federate, driven by explicit commands.
///
/// Transitions are one-way; `Errored` absorbs from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum FederateState {
    /// Registering interfaces; the only state registration is legal in.
    Created,
    /// Waiting at or past the initialization barrier.
    Initializing,
    /// Granted logical time; may publish and consume updates.
    Executing,
    /// Finalize requested, disconnect in progress.
    Finalizing,
    /// Fully disconnected from the federation.
    Finalized,
    /// Absorbing error state.
    Errored,
}

impl FederateState {
    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_advance_to(self, next: FederateState) -> bool {
        use FederateState::*;
        if next == Errored {
            return self != Finalized;
        }
        matches!(
            (self, next),
            (Created, Initializing)
                | (Initializing, Executing)
                | (Created, Finalizing)
                | (Initializing, Finalizing)
                | (Executing, Finalizing)
                | (Finalizing, Finalized)
        )
    }
}

impl fmt::Display for FederateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FederateState::Created => "created",
            FederateState::Initializing => "initializing",
            FederateState::Executing => "executing",
            FederateState::Finalizing => "finalizing",
            FederateState::Finalized => "finalized",
            FederateState::Errored => "errored",
        };
        f.write_str(s)
    }
}
