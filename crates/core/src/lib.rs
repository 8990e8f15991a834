//! Core nodes: the federate-hosting leaves of the federation tree.
//!
//! A core runs one actor loop hosting any number of federates. It owns
//! their handle tables, value cells and per-federate
//! [`TimeCoordinator`](tandem_coordination::TimeCoordinator)s, and talks
//! to its parent broker through routed action messages. The public API
//! is a thin facade: every call posts a command into the core's queue
//! and blocks on a single-shot reply channel, so all state stays behind
//! the queue boundary.

mod config;
mod federate;
mod pending;
mod state;
mod value_store;

pub use config::CoreOptions;
pub use federate::{Core, Federate, TimeResult};
pub use pending::{ApiReply, PendingCalls};
pub use state::CoreState;
pub use value_store::{PendingPublish, ValueCell};
