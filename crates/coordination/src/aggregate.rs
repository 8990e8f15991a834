//! Aggregate timing view of a subtree.

use std::collections::BTreeMap;
use tandem_protocol::TimingInfo;
use tandem_types::{GlobalId, SimTime};

/// The timing picture a broker (or core) keeps of its children.
///
/// Each child (a core, a sub-broker, or a local federate) reports a
/// [`TimingInfo`] triple; the aggregate is the component-wise minimum,
/// which is what gets reported one level up. Used for barriers, stall
/// detection, disconnect bookkeeping and queries; per-federate grants
/// are decided by the owning core's coordinators.
#[derive(Debug, Default)]
pub struct SubtreeTimeState {
    children: BTreeMap<GlobalId, TimingInfo>,
    last_reported: Option<TimingInfo>,
}

impl SubtreeTimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Record a child's report (last-write-wins).
    pub fn update(&mut self, child: GlobalId, info: TimingInfo) {
        self.children.insert(child, info);
    }

    /// Record just a granted time for a child, keeping its other fields.
    pub fn update_grant(&mut self, child: GlobalId, granted: SimTime) {
        let entry = self
            .children
            .entry(child)
            .or_insert_with(TimingInfo::unconstrained);
        entry.time_grant = entry.time_grant.max(granted);
    }

    pub fn remove(&mut self, child: GlobalId) {
        self.children.remove(&child);
    }

    /// Component-wise minimum over all children; unconstrained when the
    /// subtree is empty.
    pub fn aggregate(&self) -> TimingInfo {
        self.children
            .values()
            .copied()
            .fold(TimingInfo::unconstrained(), TimingInfo::min_with)
    }

    /// Slowest granted time in the subtree, the federation's notion of
    /// "current time" for queries.
    pub fn min_granted(&self) -> SimTime {
        self.children
            .values()
            .map(|i| i.time_grant)
            .min()
            .unwrap_or(SimTime::ZERO)
    }

    /// The aggregate, if it changed since the last call. Drives upward
    /// propagation without re-sending identical reports.
    pub fn changed_aggregate(&mut self) -> Option<TimingInfo> {
        let agg = self.aggregate();
        if self.last_reported == Some(agg) {
            None
        } else {
            self.last_reported = Some(agg);
            Some(agg)
        }
    }
}
