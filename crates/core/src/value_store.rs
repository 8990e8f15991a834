//! Per-input value cells.

use std::collections::HashMap;
use tandem_types::{GlobalId, HandleFlags, SimTime};
use tracing::trace;

/// A publish held back until the owning federate is granted its time.
#[derive(Debug, Clone)]
pub struct PendingPublish {
    pub time: SimTime,
    pub message_id: u32,
    pub source: GlobalId,
    pub data: Vec<u8>,
}

/// Last-received value state of one input.
///
/// Invariant: while `has_update` is set, the next read observes the
/// stored payload and clears the flag. Publishes timestamped beyond the
/// owner's granted time wait in `pending` and are applied, in
/// (time, message id) order, when the grant reaches them, so a federate
/// never observes a value from its own future.
#[derive(Debug, Default)]
pub struct ValueCell {
    flags: HandleFlags,
    default: Option<Vec<u8>>,
    data: Option<Vec<u8>>,
    time: SimTime,
    has_update: bool,
    pending: Vec<PendingPublish>,
    /// Highest message id applied or queued per source, for duplicate
    /// suppression (ids are monotonic per source node).
    last_seen: HashMap<GlobalId, u32>,
}

impl ValueCell {
    pub fn new(flags: HandleFlags) -> Self {
        ValueCell {
            flags,
            ..ValueCell::default()
        }
    }

    pub fn flags(&self) -> HandleFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut HandleFlags {
        &mut self.flags
    }

    pub fn set_default(&mut self, data: Vec<u8>) {
        self.default = Some(data);
    }

    fn is_duplicate(&mut self, source: GlobalId, message_id: u32) -> bool {
        match self.last_seen.get(&source) {
            Some(&seen) if message_id <= seen => true,
            _ => {
                self.last_seen.insert(source, message_id);
                false
            }
        }
    }

    /// Apply a payload whose time is within the owner's granted window.
    /// Returns true when the cell changed.
    pub fn apply_now(
        &mut self,
        source: GlobalId,
        message_id: u32,
        time: SimTime,
        data: Vec<u8>,
    ) -> bool {
        if self.is_duplicate(source, message_id) {
            trace!(%source, message_id, "duplicate publish dropped");
            return false;
        }
        self.store(time, data)
    }

    /// Hold a future-timestamped payload until the grant reaches it.
    pub fn queue(&mut self, publish: PendingPublish) {
        if self.is_duplicate(publish.source, publish.message_id) {
            trace!(source = %publish.source, publish.message_id, "duplicate publish dropped");
            return;
        }
        self.pending.push(publish);
    }

    /// Apply every held payload with time ≤ `through`, in (time,
    /// message id) order. Returns true when anything applied.
    pub fn release_through(&mut self, through: SimTime) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let mut due: Vec<PendingPublish> = Vec::new();
        let mut rest: Vec<PendingPublish> = Vec::new();
        for publish in self.pending.drain(..) {
            if publish.time <= through {
                due.push(publish);
            } else {
                rest.push(publish);
            }
        }
        self.pending = rest;
        due.sort_by_key(|p| (p.time, p.message_id));
        let mut applied = false;
        for publish in due {
            applied |= self.store(publish.time, publish.data);
        }
        applied
    }

    /// Earliest held timestamp, if any.
    pub fn next_pending_time(&self) -> Option<SimTime> {
        self.pending.iter().map(|p| p.time).min()
    }

    fn store(&mut self, time: SimTime, data: Vec<u8>) -> bool {
        if self.flags.only_update_on_change && self.data.as_deref() == Some(data.as_slice()) {
            trace!("unchanged payload dropped");
            return false;
        }
        self.data = Some(data);
        self.time = time;
        self.has_update = true;
        true
    }

    /// Read the value and mark it consumed. Falls back to the default
    /// payload when nothing is available or, without `buffer_data`,
    /// once the stored value has been consumed.
    pub fn read(&mut self) -> Vec<u8> {
        let consumed_view = self.has_update || self.flags.buffer_data;
        self.has_update = false;
        if consumed_view {
            if let Some(data) = &self.data {
                return data.clone();
            }
        }
        self.default.clone().unwrap_or_default()
    }

    pub fn is_updated(&self) -> bool {
        self.has_update
    }

    pub fn last_update_time(&self) -> SimTime {
        self.time
    }
}
