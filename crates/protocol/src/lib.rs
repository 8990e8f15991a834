//! Action messages: the uniform command record on every federation link.
//!
//! All inter- and intra-node control is a sequence of [`ActionMessage`]s.
//! The [`ActionCode`] determines which queue band a message lands in and
//! how it is dispatched; [`codec`] provides the sbor + LZ4 wire format.

mod action;
pub mod codec;
mod message;
mod payloads;

pub use action::ActionCode;
pub use message::{
    ActionMessage, FLAG_DESTINATION, FLAG_ERROR, FLAG_GLOBAL, FLAG_ITERATE, FLAG_ITERATION_LIMIT,
};
pub use payloads::{decode_payload, encode_payload, HandleRegistration, OptionUpdate, TimingInfo};
