//! The per-node actor runtime.
//!
//! Every broker and core is one worker thread draining one
//! [`CommandQueue`]. External producers (transports, timers, API
//! facades) only ever enqueue; all state mutation happens on the worker.
//! That yields deterministic, lockless node state without giving up
//! concurrency between nodes, in the same shape as a pinned event loop
//! fed by crossbeam channels.

mod actor;
mod options;
mod processor;
mod queue;
mod timer;

pub use actor::{spawn_node, NodeHandle};
pub use options::{level_for, LogOptions, NodeOptions, OptionError};
pub use processor::{MessageProcessor, Outbound};
pub use queue::{command_queue, CommandReceiver, CommandSender, Envelope};
pub use timer::TickTimer;
