//! Core types for the tandem co-simulation runtime.
//!
//! This crate provides the foundational types used throughout the
//! federation runtime:
//!
//! - **Time**: [`SimTime`], the logical clock every grant is expressed in
//! - **Identifiers**: [`GlobalId`], [`NodeId`], [`RouteId`]
//! - **Interfaces**: handle kinds, flags, and registration records
//! - **Lifecycle**: the one-way federate state progression
//! - **Errors**: [`FederationError`], the error surface of the runtime
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod error;
mod handle;
mod identifiers;
mod lifecycle;
mod time;

pub use error::FederationError;
pub use handle::{HandleFlags, HandleInfo, HandleKind, HandleOption};
pub use identifiers::{GlobalId, NodeId, RouteId};
pub use lifecycle::FederateState;
pub use time::SimTime;
