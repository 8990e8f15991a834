//! The uniform command record.

use crate::ActionCode;
use sbor::prelude::BasicSbor;
use std::fmt;
use tandem_types::{GlobalId, SimTime};

/// Time request wants an iterative grant.
pub const FLAG_ITERATE: u16 = 1 << 0;
/// Grant was issued because the iteration limit was reached.
pub const FLAG_ITERATION_LIMIT: u16 = 1 << 1;
/// The message reports an error condition.
pub const FLAG_ERROR: u16 = 1 << 2;
/// Registration uses the key verbatim instead of federate-scoping it.
pub const FLAG_GLOBAL: u16 = 1 << 3;
/// Message addressed to a resolved destination handle.
pub const FLAG_DESTINATION: u16 = 1 << 4;

/// Wire-and-internal command: every link in the federation carries a
/// sequence of these and nothing else.
///
/// `message_id` is monotonic per source node; receivers treat repeated
/// application as idempotent (grants and dependency reports are
/// last-write-wins, publishes are deduplicated by id).
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ActionMessage {
    pub action: ActionCode,
    pub source: GlobalId,
    pub dest: GlobalId,
    pub message_id: u32,
    pub time: SimTime,
    /// Per-(source, action kind) sequence, used for link FIFO checks.
    pub counter: u16,
    pub flags: u16,
    pub payload: Vec<u8>,
    pub name: String,
}

impl ActionMessage {
    pub fn new(action: ActionCode) -> Self {
        ActionMessage {
            action,
            source: GlobalId::INVALID,
            dest: GlobalId::INVALID,
            message_id: 0,
            time: SimTime::ZERO,
            counter: 0,
            flags: 0,
            payload: Vec::new(),
            name: String::new(),
        }
    }

    pub fn flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u16) {
        self.flags |= flag;
    }

    pub fn with_source(mut self, source: GlobalId) -> Self {
        self.source = source;
        self
    }

    pub fn with_dest(mut self, dest: GlobalId) -> Self {
        self.dest = dest;
        self
    }

    pub fn with_time(mut self, time: SimTime) -> Self {
        self.time = time;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

impl fmt::Display for ActionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} to {} @{}",
            self.action.name(),
            self.source,
            self.dest,
            self.time
        )?;
        if !self.name.is_empty() {
            write!(f, " '{}'", self.name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut msg = ActionMessage::new(ActionCode::TimeRequest);
        assert!(!msg.flag(FLAG_ITERATE));
        msg.set_flag(FLAG_ITERATE);
        assert!(msg.flag(FLAG_ITERATE));
        assert!(!msg.flag(FLAG_ERROR));
    }

    #[test]
    fn test_builder_fields() {
        let msg = ActionMessage::new(ActionCode::Publish)
            .with_source(GlobalId(0x0002_0003))
            .with_dest(GlobalId(0x0004_0005))
            .with_time(SimTime::from_seconds(1.0))
            .with_payload(vec![1, 2, 3]);
        assert_eq!(msg.source.local(), 3);
        assert_eq!(msg.dest.local(), 5);
        assert_eq!(msg.payload, vec![1, 2, 3]);
    }
}
