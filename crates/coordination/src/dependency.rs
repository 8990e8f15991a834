//! Dependency bookkeeping for a coordinator.

use tandem_protocol::TimingInfo;
use tandem_types::{GlobalId, SimTime};

/// Last-reported timing state of one dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyInfo {
    pub id: GlobalId,
    pub time_next: SimTime,
    pub time_minde: SimTime,
    pub time_grant: SimTime,
}

impl DependencyInfo {
    /// A freshly added edge blocks everything until its first report.
    fn new(id: GlobalId) -> Self {
        DependencyInfo {
            id,
            time_next: SimTime::ZERO,
            time_minde: SimTime::ZERO,
            time_grant: SimTime::ZERO,
        }
    }

    /// The time up to which this dependency cannot surprise us: it has
    /// either promised no output before `time_next` or already been
    /// granted past it.
    pub fn bound(&self) -> SimTime {
        self.time_next.max(self.time_grant)
    }
}

/// The dependency edges of one coordinator, held as a vector sorted by
/// id. The graph may cycle across coordinators; each set owns only its
/// incoming edges, so no shared-ownership cycles exist.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    entries: Vec<DependencyInfo>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge; returns false if it was already present.
    pub fn insert(&mut self, id: GlobalId) -> bool {
        match self.entries.binary_search_by_key(&id, |d| d.id) {
            Ok(_) => false,
            Err(pos) => {
                self.entries.insert(pos, DependencyInfo::new(id));
                true
            }
        }
    }

    /// Remove an edge; returns false if it was not present.
    pub fn remove(&mut self, id: GlobalId) -> bool {
        match self.entries.binary_search_by_key(&id, |d| d.id) {
            Ok(pos) => {
                self.entries.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, id: GlobalId) -> Option<&DependencyInfo> {
        self.entries
            .binary_search_by_key(&id, |d| d.id)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Record a report from a dependency; returns false for unknown ids.
    pub fn update(&mut self, id: GlobalId, info: TimingInfo) -> bool {
        match self.entries.binary_search_by_key(&id, |d| d.id) {
            Ok(pos) => {
                let entry = &mut self.entries[pos];
                entry.time_next = info.time_next;
                entry.time_minde = info.time_minde;
                entry.time_grant = info.time_grant;
                true
            }
            Err(_) => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependencyInfo> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Minimum earliest-output promise across all edges.
    pub fn min_time_next(&self) -> SimTime {
        self.entries
            .iter()
            .map(|d| d.time_next)
            .min()
            .unwrap_or(SimTime::MAX_TIME)
    }

    /// Minimum of [`DependencyInfo::bound`] across all edges; grants up
    /// to this time are safe.
    pub fn min_bound(&self) -> SimTime {
        self.entries
            .iter()
            .map(|d| d.bound())
            .min()
            .unwrap_or(SimTime::MAX_TIME)
    }
}
