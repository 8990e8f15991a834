//! Per-federate time coordination state machine.

use crate::{DependencySet, TimingConfig};
use tandem_protocol::{encode_payload, ActionCode, ActionMessage, TimingInfo};
use tandem_types::{GlobalId, SimTime};
use tracing::{debug, error, trace};

/// A grant decision produced by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantResult {
    pub time: SimTime,
    /// Set when the grant was forced out by the iteration limit.
    pub iteration_limit: bool,
}

/// Result of feeding one input to the coordinator: an optional grant for
/// the owning federate plus dependency reports for the caller to route.
#[derive(Debug, Default)]
pub struct CoordinatorOutput {
    pub grant: Option<GrantResult>,
    pub updates: Vec<ActionMessage>,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    time: SimTime,
    iterate: bool,
    iterations: u16,
}

/// The logical-clock state machine for one federate.
///
/// Tracks the incoming dependency edges that constrain this federate's
/// grants and the dependents that must hear about its progress. All
/// methods are synchronous and I/O free; outbound messages are returned
/// for the owning core to stamp and route.
///
/// The granting rule: with an outstanding request the effective demand is
/// `min(requested, earliest pending event)` floored at `granted + period`;
/// the grant is issued once every dependency has either promised no
/// output before that time or already been granted past it. Grants are
/// non-decreasing for the life of the federation.
#[derive(Debug)]
pub struct TimeCoordinator {
    id: GlobalId,
    config: TimingConfig,
    executing: bool,
    granted: SimTime,
    request: Option<PendingRequest>,
    /// Earliest pending input event, `MAX_TIME` when none.
    next_event: SimTime,
    deps: DependencySet,
    dependents: Vec<GlobalId>,
    /// Last (next, minde, grant) triple sent to dependents.
    last_sent: Option<TimingInfo>,
    /// An iterative request is currently held back by a same-time tie.
    deferred: bool,
}

impl TimeCoordinator {
    pub fn new(id: GlobalId, config: TimingConfig) -> Self {
        TimeCoordinator {
            id,
            config,
            executing: false,
            granted: SimTime::ZERO,
            request: None,
            next_event: SimTime::MAX_TIME,
            deps: DependencySet::new(),
            dependents: Vec::new(),
            last_sent: None,
            deferred: false,
        }
    }

    pub fn id(&self) -> GlobalId {
        self.id
    }

    pub fn granted(&self) -> SimTime {
        self.granted
    }

    pub fn has_request(&self) -> bool {
        self.request.is_some()
    }

    pub fn dependents(&self) -> &[GlobalId] {
        &self.dependents
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.deps
    }

    /// Earliest time this federate may next produce output.
    pub fn time_next(&self) -> SimTime {
        if !self.executing {
            return SimTime::ZERO;
        }
        match self.demand() {
            Some(demand) => demand.saturating_add(self.config.output_delay),
            None => self
                .granted
                .saturating_add(self.config.period)
                .saturating_add(self.config.output_delay),
        }
    }

    /// Minimum dependent-event time, reported upstream for aggregation.
    pub fn time_minde(&self) -> SimTime {
        self.next_event.min(self.deps.min_time_next())
    }

    pub fn timing_info(&self) -> TimingInfo {
        TimingInfo {
            time_next: self.time_next(),
            time_minde: self.time_minde(),
            time_grant: self.granted,
        }
    }

    /// The time the outstanding request would be granted at, were all
    /// dependencies to permit it.
    fn demand(&self) -> Option<SimTime> {
        let req = self.request.as_ref()?;
        // An iterative re-request at the granted time stays there; a
        // forward request cannot land closer than one period out.
        let floor = if req.time <= self.granted {
            self.granted
        } else {
            self.granted.saturating_add(self.config.period)
        };
        Some(req.time.min(self.next_event).max(floor))
    }

    // ── Topology ──

    pub fn add_dependency(&mut self, id: GlobalId) -> bool {
        self.deps.insert(id)
    }

    pub fn add_dependent(&mut self, id: GlobalId) {
        if let Err(pos) = self.dependents.binary_search(&id) {
            self.dependents.insert(pos, id);
            // A new dependent needs our current picture.
            self.last_sent = None;
        }
    }

    pub fn remove_dependent(&mut self, id: GlobalId) {
        if let Ok(pos) = self.dependents.binary_search(&id) {
            self.dependents.remove(pos);
        }
    }

    pub fn remove_dependency(&mut self, id: GlobalId) -> CoordinatorOutput {
        if self.deps.remove(id) {
            debug!(coordinator = %self.id, removed = %id, "dependency removed");
        }
        self.step()
    }

    /// A peer left the federation: drop both edge directions and
    /// re-evaluate, which may immediately unblock an outstanding request.
    pub fn disconnect_peer(&mut self, id: GlobalId) -> CoordinatorOutput {
        self.remove_dependent(id);
        self.remove_dependency(id)
    }

    // ── Protocol inputs ──

    /// Enter execution: the federation-wide grant at time zero.
    pub fn enter_executing(&mut self) -> CoordinatorOutput {
        self.executing = true;
        self.granted = SimTime::ZERO;
        self.last_sent = None;
        self.step()
    }

    /// The owning federate asks to advance to `time`.
    ///
    /// A request at or below the granted time (without iteration) is a
    /// no-op that satisfies immediately, which is also how outstanding
    /// requests are cancelled.
    pub fn request_time(&mut self, time: SimTime, iterate: bool) -> CoordinatorOutput {
        if !self.executing {
            return CoordinatorOutput::default();
        }
        if time <= self.granted && !iterate {
            return CoordinatorOutput {
                grant: Some(GrantResult {
                    time: self.granted,
                    iteration_limit: false,
                }),
                updates: Vec::new(),
            };
        }
        self.request = Some(PendingRequest {
            time,
            iterate,
            iterations: 0,
        });
        self.deferred = false;
        self.step()
    }

    /// A value with timestamp `time` is pending for the owning federate.
    pub fn record_event(&mut self, time: SimTime) -> CoordinatorOutput {
        if time <= self.granted {
            // Applies immediately; no constraint on future grants.
            return CoordinatorOutput::default();
        }
        self.next_event = self.next_event.min(time);
        self.step()
    }

    /// Re-run the granting rule with no new input. The owning node calls
    /// this on its tick so a deferred iterative request keeps making
    /// rounds (and eventually hits its limit) even when no dependency
    /// traffic arrives.
    pub fn reevaluate(&mut self) -> CoordinatorOutput {
        if self.request.is_some() {
            self.step()
        } else {
            CoordinatorOutput::default()
        }
    }

    /// A dependency reported new timing state (last-write-wins).
    pub fn update_dependency(&mut self, source: GlobalId, info: TimingInfo) -> CoordinatorOutput {
        if !self.deps.update(source, info) {
            trace!(coordinator = %self.id, %source, "timing report from non-dependency");
            return CoordinatorOutput::default();
        }
        self.step()
    }

    // ── Evaluation ──

    /// Re-evaluate the granting rule and collect dependency reports.
    fn step(&mut self) -> CoordinatorOutput {
        let (grant, echo) = self.evaluate();
        let updates = self.broadcast(echo);
        CoordinatorOutput { grant, updates }
    }

    /// Apply the granting rule. Returns the grant, if any, and whether a
    /// deferral echo must be broadcast to drive the next iteration round.
    fn evaluate(&mut self) -> (Option<GrantResult>, bool) {
        if !self.executing {
            return (None, false);
        }
        let Some(demand) = self.demand() else {
            return (None, false);
        };
        let req = match self.request {
            Some(req) => req,
            None => return (None, false),
        };

        if self.deps.min_bound() < demand {
            self.deferred = false;
            return (None, false);
        }

        // Same-time tie with an iterative request: hold the grant while
        // any dependency may still produce output at exactly this time
        // (it has not promised to stay silent past it), until the round
        // budget runs out. Rounds are driven by dependency updates,
        // same-time events, and the owner's tick via [`reevaluate`].
        let tied = req.iterate
            && self
                .deps
                .iter()
                .any(|d| d.time_next == demand && d.time_grant <= demand);
        if tied {
            let iterations = match self.request.as_mut() {
                Some(req) => {
                    req.iterations += 1;
                    req.iterations
                }
                None => return (None, false),
            };
            if iterations < self.config.max_iterations {
                self.deferred = true;
                trace!(
                    coordinator = %self.id,
                    time = %demand,
                    iterations,
                    "grant deferred for iteration"
                );
                return (None, true);
            }
            debug!(
                coordinator = %self.id,
                time = %demand,
                "iteration limit reached, forcing grant"
            );
            return (Some(self.take_grant(demand, true)), false);
        }

        (Some(self.take_grant(demand, false)), false)
    }

    fn take_grant(&mut self, time: SimTime, iteration_limit: bool) -> GrantResult {
        debug_assert!(time >= self.granted, "grants must be non-decreasing");
        self.granted = time;
        self.request = None;
        self.deferred = false;
        if self.next_event <= time {
            self.next_event = SimTime::MAX_TIME;
        }
        debug!(coordinator = %self.id, granted = %time, iteration_limit, "time granted");
        GrantResult {
            time,
            iteration_limit,
        }
    }

    /// Send the (time_next, time_minde, grant) triple to every dependent
    /// when it changed since the last send, or unconditionally when a
    /// deferral echo is needed to make iteration rounds progress.
    fn broadcast(&mut self, force: bool) -> Vec<ActionMessage> {
        let info = self.timing_info();
        if !force && self.last_sent == Some(info) {
            return Vec::new();
        }
        self.last_sent = Some(info);
        let payload = match encode_payload(&info) {
            Ok(payload) => payload,
            Err(err) => {
                error!(coordinator = %self.id, %err, "failed to encode timing report");
                return Vec::new();
            }
        };
        self.dependents
            .iter()
            .map(|&dep| {
                ActionMessage::new(ActionCode::TimeDependency)
                    .with_source(self.id)
                    .with_dest(dep)
                    .with_time(info.time_next)
                    .with_payload(payload.clone())
            })
            .collect()
    }
}
