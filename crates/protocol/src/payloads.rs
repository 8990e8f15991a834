//! Structured payloads carried inside action messages.

use crate::codec::CodecError;
use sbor::prelude::{BasicDecode, BasicEncode, BasicSbor};
use tandem_types::{HandleFlags, HandleKind, HandleOption, SimTime};

/// Timing triple exchanged by `TimeDependency` messages.
///
/// Last-write-wins per source: a newer report fully replaces the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct TimingInfo {
    /// Earliest time the sender may next produce output.
    pub time_next: SimTime,
    /// Minimum dependent-event time over the sender's subtree.
    pub time_minde: SimTime,
    /// Last time granted to the sender.
    pub time_grant: SimTime,
}

impl TimingInfo {
    pub fn unconstrained() -> Self {
        TimingInfo {
            time_next: SimTime::MAX_TIME,
            time_minde: SimTime::MAX_TIME,
            time_grant: SimTime::ZERO,
        }
    }

    /// Component-wise minimum, used when aggregating a subtree.
    pub fn min_with(self, other: TimingInfo) -> TimingInfo {
        TimingInfo {
            time_next: self.time_next.min(other.time_next),
            time_minde: self.time_minde.min(other.time_minde),
            time_grant: self.time_grant.min(other.time_grant),
        }
    }
}

/// Registration record for a publication or input handle.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct HandleRegistration {
    pub kind: HandleKind,
    pub type_tag: String,
    pub units: String,
    pub flags: HandleFlags,
}

/// Option change for a handle, carried by the set/get option commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct OptionUpdate {
    pub option: HandleOption,
    pub value: bool,
}

/// Encode a structured payload for an action message.
pub fn encode_payload<T: BasicEncode>(value: &T) -> Result<Vec<u8>, CodecError> {
    sbor::basic_encode(value).map_err(|e| CodecError::Encode(format!("{e:?}")))
}

/// Decode a structured payload out of an action message.
pub fn decode_payload<T: BasicDecode>(payload: &[u8]) -> Result<T, CodecError> {
    sbor::basic_decode(payload).map_err(|e| CodecError::Decode(format!("{e:?}")))
}
