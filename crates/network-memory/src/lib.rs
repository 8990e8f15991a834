//! In-process transport backend.
//!
//! Connects federation nodes living in one process: every node registers
//! a [`MessageSink`] and gets a [`MemoryTransport`]; links are wired
//! parent/child by name. Delivery decodes the wire bytes on the sender's
//! thread and pushes straight into the receiver's sink, so each link is
//! trivially FIFO. Used by the integration tests and any in-process
//! federation.

mod fabric;

pub use fabric::{MemoryFabric, MemoryTransport};
