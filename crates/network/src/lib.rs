//! Transport seam between federation nodes.
//!
//! Defines the interfaces implemented by concrete backends. The runtime
//! only ever sees these traits: outbound messages go through
//! [`Transport::send`] as encoded bytes, inbound ones arrive through a
//! [`MessageSink`] tagged with the link they came in on. Per-link the
//! transport must preserve order; duplicates are tolerated because
//! messages carry monotonic ids.

mod traits;

pub use traits::{MessageSink, Transport, TransportError};
