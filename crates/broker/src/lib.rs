//! Broker nodes: the interior of the federation tree.
//!
//! A broker routes action messages between its children and its parent,
//! runs the registration and lifecycle-barrier protocols, aggregates
//! subtree timing, and owns the root name table when it is the root.
//! The [`BrokerState`] state machine does all of that synchronously on
//! the actor loop; [`Broker`] is the spawn-and-handle facade.

mod broker;
mod config;
mod registry;
mod routing;
mod state;

pub use broker::{Broker, BrokerRole};
pub use config::BrokerOptions;
pub use registry::{Binding, InterfaceRegistry, ResolutionOutcome};
pub use routing::RoutingTable;
pub use state::BrokerState;
