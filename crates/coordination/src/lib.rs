//! Time coordination for the federation.
//!
//! The [`TimeCoordinator`] is the per-federate protocol state machine:
//! it tracks the dependency graph edges that constrain a federate's
//! logical clock, evaluates the granting rule, and emits the dependency
//! reports that keep peers consistent. [`SubtreeTimeState`] is the
//! aggregate view a broker (or core) keeps of its children.
//!
//! Both are synchronous and perform no I/O: inputs are protocol messages
//! and local operations, outputs are grants plus messages for the caller
//! to route. Determinism falls out of that shape: same state, same
//! input, same output.

mod aggregate;
mod config;
mod coordinator;
mod dependency;

pub use aggregate::SubtreeTimeState;
pub use config::TimingConfig;
pub use coordinator::{CoordinatorOutput, GrantResult, TimeCoordinator};
pub use dependency::{DependencyInfo, DependencySet};
