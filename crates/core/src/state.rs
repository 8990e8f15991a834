//! The core state machine: federate hosting, value plane, time grants.

use crate::value_store::{PendingPublish, ValueCell};
use crate::{ApiReply, CoreOptions, PendingCalls};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tandem_coordination::{GrantResult, SubtreeTimeState, TimeCoordinator, TimingConfig};
use tandem_protocol::{
    decode_payload, encode_payload, ActionCode, ActionMessage, HandleRegistration, OptionUpdate,
    TimingInfo, FLAG_GLOBAL, FLAG_ITERATE,
};
use tandem_runtime::{Envelope, MessageProcessor, Outbound};
use tandem_types::{
    FederateState, FederationError, GlobalId, HandleInfo, HandleKind, NodeId, SimTime,
};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CorePhase {
    Connecting,
    Operating,
    Initializing,
    Executing,
}

struct FederateRuntime {
    id: GlobalId,
    name: String,
    state: FederateState,
    timing: TimingConfig,
    coordinator: TimeCoordinator,
    registered_keys: HashSet<String>,
    init_requested: bool,
    exec_requested: bool,
    pending_init: Option<u32>,
    pending_exec: Option<u32>,
    pending_time: Option<u32>,
}

struct PublicationHandle {
    info: HandleInfo,
    subscribers: Vec<GlobalId>,
    next_seq: u16,
}

struct InputHandle {
    info: HandleInfo,
    cell: ValueCell,
    sources: Vec<GlobalId>,
}

/// Message-processing state of one core.
///
/// Owns every hosted federate's handles, value cells and
/// [`TimeCoordinator`]; the blocking federate API talks to it purely
/// through queue commands correlated by message id against the shared
/// [`PendingCalls`] table.
pub struct CoreState {
    identifier: String,
    options: CoreOptions,
    node_id: Option<NodeId>,
    phase: CorePhase,
    now: Duration,
    connect_pending: Option<u32>,
    federates: HashMap<u16, FederateRuntime>,
    federate_names: HashMap<String, u16>,
    publications: HashMap<u16, PublicationHandle>,
    inputs: HashMap<u16, InputHandle>,
    next_local: u16,
    pending: Arc<PendingCalls>,
    /// message id → locally created handle, cleaned up if the root
    /// rejects the registration.
    pending_registrations: HashMap<u32, GlobalId>,
    aggregate: SubtreeTimeState,
    init_sent: bool,
    exec_sent: bool,
    errored: bool,
    halted: bool,
    finished: bool,
}

impl CoreState {
    pub fn new(options: CoreOptions, pending: Arc<PendingCalls>) -> Self {
        CoreState {
            identifier: options.node.identifier.clone(),
            options,
            node_id: None,
            phase: CorePhase::Connecting,
            now: Duration::ZERO,
            connect_pending: None,
            federates: HashMap::new(),
            federate_names: HashMap::new(),
            publications: HashMap::new(),
            inputs: HashMap::new(),
            next_local: 1,
            pending,
            pending_registrations: HashMap::new(),
            aggregate: SubtreeTimeState::new(),
            init_sent: false,
            exec_sent: false,
            errored: false,
            halted: false,
            finished: false,
        }
    }

    fn my_id(&self) -> GlobalId {
        self.node_id.map(GlobalId::for_node).unwrap_or_default()
    }

    fn is_local(&self, id: GlobalId) -> bool {
        match self.node_id {
            Some(node) => id.is_valid() && id.node() == node,
            None => false,
        }
    }

    fn stamp(&mut self, mut message: ActionMessage) -> ActionMessage {
        if message.message_id == 0 {
            message.message_id = self.pending.allocate_id();
        }
        if !message.source.is_valid() {
            message.source = self.my_id();
        }
        message
    }

    fn fail(&self, id: u32, err: FederationError) -> Vec<Outbound> {
        self.pending.complete(id, ApiReply::Failed(err));
        Vec::new()
    }

    // ── Connection & federate registration ──

    fn handle_connect(&mut self, message: ActionMessage) -> Vec<Outbound> {
        self.connect_pending = Some(message.message_id);
        let mut up = ActionMessage::new(ActionCode::RegisterCore).with_name(self.identifier.clone());
        up.message_id = message.message_id;
        vec![Outbound::to_parent(up)]
    }

    fn handle_connection_ack(&mut self, message: ActionMessage) -> Vec<Outbound> {
        if message.name != self.identifier {
            warn!(core = %self.identifier, name = %message.name, "ack for unknown name");
            return Vec::new();
        }
        self.node_id = Some(message.dest.node());
        self.phase = CorePhase::Operating;
        info!(core = %self.identifier, node = %message.dest.node(), "connected to broker");
        if let Some(id) = self.connect_pending.take() {
            self.pending.complete(id, ApiReply::Ack);
        }
        Vec::new()
    }

    fn handle_join(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let Some(node) = self.node_id else {
            return self.fail(message.message_id, FederationError::Disconnected);
        };
        if self.phase != CorePhase::Operating {
            return self.fail(
                message.message_id,
                FederationError::InvalidState(FederateState::Initializing),
            );
        }
        if self.federate_names.contains_key(&message.name) {
            return self.fail(
                message.message_id,
                FederationError::NameCollision(message.name),
            );
        }
        let timing: TimingConfig = decode_payload(&message.payload).unwrap_or(TimingConfig {
            max_iterations: self.options.max_iterations,
            ..TimingConfig::default()
        });
        let local = self.next_local;
        self.next_local += 1;
        let id = GlobalId::new(node, local);
        self.federates.insert(
            local,
            FederateRuntime {
                id,
                name: message.name.clone(),
                state: FederateState::Created,
                timing,
                coordinator: TimeCoordinator::new(id, timing),
                registered_keys: HashSet::new(),
                init_requested: false,
                exec_requested: false,
                pending_init: None,
                pending_exec: None,
                pending_time: None,
            },
        );
        self.federate_names.insert(message.name.clone(), local);
        debug!(core = %self.identifier, federate = %message.name, %id, "federate joined");

        let mut up = ActionMessage::new(ActionCode::RegisterFederate)
            .with_source(id)
            .with_name(message.name);
        up.message_id = message.message_id;
        vec![Outbound::to_parent(up)]
    }

    // ── Handle registration ──

    fn handle_register_handle(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let Some(node) = self.node_id else {
            return self.fail(message.message_id, FederationError::Disconnected);
        };
        let fed_local = message.source.local();
        let (fed_name, fed_state) = match self.federates.get(&fed_local) {
            Some(fed) => (fed.name.clone(), fed.state),
            None => {
                return self.fail(
                    message.message_id,
                    FederationError::InvalidHandle(message.source),
                )
            }
        };
        if fed_state != FederateState::Created {
            return self.fail(message.message_id, FederationError::InvalidState(fed_state));
        }
        let registration: HandleRegistration = match decode_payload(&message.payload) {
            Ok(registration) => registration,
            Err(err) => {
                return self.fail(
                    message.message_id,
                    FederationError::Internal(format!("malformed registration: {err}")),
                )
            }
        };
        let key = message.name.clone();
        if let Some(fed) = self.federates.get_mut(&fed_local) {
            if !fed.registered_keys.insert(key.clone()) {
                return self.fail(message.message_id, FederationError::LocalNameCollision(key));
            }
        }

        let global = message.flag(FLAG_GLOBAL);
        let scoped = if global {
            key.clone()
        } else {
            format!("{fed_name}/{key}")
        };
        let local = self.next_local;
        self.next_local += 1;
        let id = GlobalId::new(node, local);
        let info = HandleInfo {
            id,
            owner: message.source,
            kind: registration.kind,
            key,
            type_tag: registration.type_tag.clone(),
            units: registration.units.clone(),
            flags: registration.flags,
        };
        match registration.kind {
            HandleKind::Publication => {
                self.publications.insert(
                    local,
                    PublicationHandle {
                        info,
                        subscribers: Vec::new(),
                        next_seq: 0,
                    },
                );
            }
            HandleKind::Input => {
                let cell = ValueCell::new(registration.flags);
                self.inputs.insert(
                    local,
                    InputHandle {
                        info,
                        cell,
                        sources: Vec::new(),
                    },
                );
            }
        }
        self.pending_registrations.insert(message.message_id, id);

        let mut up = ActionMessage::new(message.action)
            .with_source(id)
            .with_name(scoped)
            .with_payload(message.payload);
        up.message_id = message.message_id;
        up.counter = fed_local;
        up.flags = message.flags;
        vec![Outbound::to_parent(up)]
    }

    fn handle_add_source_target(&mut self, message: ActionMessage) -> Vec<Outbound> {
        // source = input handle, dest = owning federate, name = target.
        let input_local = message.source.local();
        let Some(input) = self.inputs.get(&input_local) else {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.source),
            );
        };
        if input.info.owner != message.dest {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.source),
            );
        }
        vec![Outbound::to_parent(message)]
    }

    fn handle_registration_ack(&mut self, message: ActionMessage) -> Vec<Outbound> {
        self.pending_registrations.remove(&message.message_id);
        self.pending
            .complete(message.message_id, ApiReply::Handle(message.dest));
        Vec::new()
    }

    // ── Lifecycle barriers ──

    fn handle_enter_init(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let fed_local = message.source.local();
        let Some(fed) = self.federates.get_mut(&fed_local) else {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.source),
            );
        };
        if fed.state != FederateState::Created {
            let state = fed.state;
            return self.fail(message.message_id, FederationError::InvalidState(state));
        }
        fed.init_requested = true;
        if self.phase == CorePhase::Initializing {
            // The barrier already passed while this federate was joining.
            fed.state = FederateState::Initializing;
            self.pending.complete(message.message_id, ApiReply::Ack);
            return Vec::new();
        }
        fed.pending_init = Some(message.message_id);

        if self.init_sent || self.federates.values().any(|f| !f.init_requested) {
            return Vec::new();
        }
        self.init_sent = true;
        let up = self.stamp(ActionMessage::new(ActionCode::InitRequest));
        vec![Outbound::to_parent(up)]
    }

    fn handle_init_grant(&mut self) -> Vec<Outbound> {
        self.phase = CorePhase::Initializing;
        for fed in self.federates.values_mut() {
            if fed.state == FederateState::Created && fed.init_requested {
                fed.state = FederateState::Initializing;
                if let Some(id) = fed.pending_init.take() {
                    self.pending.complete(id, ApiReply::Ack);
                }
            }
        }
        info!(core = %self.identifier, "initialization granted");
        Vec::new()
    }

    fn handle_enter_exec(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let fed_local = message.source.local();
        let Some(fed) = self.federates.get_mut(&fed_local) else {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.source),
            );
        };
        if fed.state != FederateState::Initializing {
            let state = fed.state;
            return self.fail(message.message_id, FederationError::InvalidState(state));
        }
        fed.exec_requested = true;
        if self.phase == CorePhase::Executing {
            fed.state = FederateState::Executing;
            let updates = fed.coordinator.enter_executing().updates;
            self.pending.complete(message.message_id, ApiReply::Ack);
            let mut outbound = Vec::new();
            self.flush_messages(updates.into(), &mut outbound);
            return outbound;
        }
        fed.pending_exec = Some(message.message_id);

        let all_ready = self
            .federates
            .values()
            .all(|f| f.exec_requested || f.state > FederateState::Executing);
        if self.exec_sent || !all_ready {
            return Vec::new();
        }
        self.exec_sent = true;
        let up = self.stamp(ActionMessage::new(ActionCode::ExecRequest));
        vec![Outbound::to_parent(up)]
    }

    fn handle_exec_grant(&mut self) -> Vec<Outbound> {
        self.phase = CorePhase::Executing;
        info!(core = %self.identifier, "execution granted at time zero");
        let mut outbound = Vec::new();
        let mut queue: VecDeque<ActionMessage> = VecDeque::new();
        let locals: Vec<u16> = self.federates.keys().copied().collect();
        for local in locals {
            let (updates, completed) = {
                let Some(fed) = self.federates.get_mut(&local) else {
                    continue;
                };
                if fed.state != FederateState::Initializing {
                    continue;
                }
                fed.state = FederateState::Executing;
                let out = fed.coordinator.enter_executing();
                (out.updates, fed.pending_exec.take())
            };
            queue.extend(updates);
            if let Some(id) = completed {
                self.pending.complete(id, ApiReply::Ack);
            }
        }
        self.flush_messages(queue, &mut outbound);
        outbound
    }

    // ── Coordination plane ──

    /// Drain a worklist of coordination/value messages: local
    /// destinations are handled in place (possibly producing more work),
    /// everything else is stamped and sent upstream.
    fn flush_messages(&mut self, initial: VecDeque<ActionMessage>, outbound: &mut Vec<Outbound>) {
        let mut queue = initial;
        let mut guard = 0u32;
        while let Some(message) = queue.pop_front() {
            guard += 1;
            if guard > 100_000 {
                warn!(core = %self.identifier, "coordination worklist guard tripped");
                break;
            }
            if self.is_local(message.dest) {
                self.handle_local_message(message, &mut queue, outbound);
            } else {
                let stamped = self.stamp(message);
                outbound.push(Outbound::to_parent(stamped));
            }
        }
        self.report_aggregate(outbound);
    }

    fn handle_local_message(
        &mut self,
        message: ActionMessage,
        queue: &mut VecDeque<ActionMessage>,
        outbound: &mut Vec<Outbound>,
    ) {
        let (fed_local, out) = match message.action {
            ActionCode::Publish => {
                let Some((fed_local, out)) = self.apply_publish(&message) else {
                    return;
                };
                (fed_local, out)
            }
            ActionCode::TimeDependency => {
                let info: TimingInfo = match decode_payload(&message.payload) {
                    Ok(info) => info,
                    Err(err) => {
                        warn!(core = %self.identifier, %err, "malformed timing report");
                        return;
                    }
                };
                let fed_local = message.dest.local();
                let Some(fed) = self.federates.get_mut(&fed_local) else {
                    return;
                };
                (fed_local, fed.coordinator.update_dependency(message.source, info))
            }
            ActionCode::AddDependency => {
                let fed_local = message.dest.local();
                let Some(fed) = self.federates.get_mut(&fed_local) else {
                    return;
                };
                fed.coordinator.add_dependency(message.source);
                (fed_local, Default::default())
            }
            ActionCode::AddDependent => {
                let fed_local = message.dest.local();
                let Some(fed) = self.federates.get_mut(&fed_local) else {
                    return;
                };
                fed.coordinator.add_dependent(message.source);
                (fed_local, Default::default())
            }
            ActionCode::RemoveDependency => {
                let fed_local = message.dest.local();
                let Some(fed) = self.federates.get_mut(&fed_local) else {
                    return;
                };
                (fed_local, fed.coordinator.remove_dependency(message.source))
            }
            ActionCode::RemoveDependent => {
                let fed_local = message.dest.local();
                let Some(fed) = self.federates.get_mut(&fed_local) else {
                    return;
                };
                fed.coordinator.remove_dependent(message.source);
                (fed_local, Default::default())
            }
            other => {
                trace!(core = %self.identifier, action = other.name(), "unhandled local message");
                return;
            }
        };
        let out: tandem_coordination::CoordinatorOutput = out;
        queue.extend(out.updates);
        if let Some(grant) = out.grant {
            self.finish_grant(fed_local, grant, queue, outbound);
        }
    }

    /// Store an arriving publish; future-timestamped payloads become
    /// pending events on the owner's coordinator.
    fn apply_publish(
        &mut self,
        message: &ActionMessage,
    ) -> Option<(u16, tandem_coordination::CoordinatorOutput)> {
        let input_local = message.dest.local();
        let owner = match self.inputs.get(&input_local) {
            Some(input) => input.info.owner,
            None => {
                warn!(core = %self.identifier, dest = %message.dest, "publish for unknown input");
                return None;
            }
        };
        let fed_local = owner.local();
        let (granted, input_delay, fed_state) = match self.federates.get(&fed_local) {
            Some(fed) => (fed.coordinator.granted(), fed.timing.input_delay, fed.state),
            None => return None,
        };
        if fed_state > FederateState::Executing {
            trace!(core = %self.identifier, "publish for finalized federate dropped");
            return None;
        }
        let effective = message.time.saturating_add(input_delay);

        let input = self.inputs.get_mut(&input_local)?;
        if effective <= granted {
            input.cell.apply_now(
                message.source,
                message.message_id,
                effective,
                message.payload.clone(),
            );
            return Some((fed_local, Default::default()));
        }
        input.cell.queue(PendingPublish {
            time: effective,
            message_id: message.message_id,
            source: message.source,
            data: message.payload.clone(),
        });
        let fed = self.federates.get_mut(&fed_local)?;
        Some((fed_local, fed.coordinator.record_event(effective)))
    }

    /// A grant was issued for a local federate: release held values,
    /// re-prime the event clock, complete the blocked call, and report
    /// progress upstream.
    fn finish_grant(
        &mut self,
        fed_local: u16,
        grant: GrantResult,
        queue: &mut VecDeque<ActionMessage>,
        outbound: &mut Vec<Outbound>,
    ) {
        let Some(fed_id) = self.federates.get(&fed_local).map(|f| f.id) else {
            return;
        };
        let mut earliest: Option<SimTime> = None;
        for input in self.inputs.values_mut() {
            if input.info.owner != fed_id {
                continue;
            }
            input.cell.release_through(grant.time);
            if let Some(time) = input.cell.next_pending_time() {
                earliest = Some(earliest.map_or(time, |e: SimTime| e.min(time)));
            }
        }
        let completed = {
            let Some(fed) = self.federates.get_mut(&fed_local) else {
                return;
            };
            if let Some(time) = earliest {
                let out = fed.coordinator.record_event(time);
                queue.extend(out.updates);
            }
            fed.pending_time.take()
        };
        if let Some(id) = completed {
            self.pending.complete(
                id,
                ApiReply::Time {
                    granted: grant.time,
                    iteration_limit: grant.iteration_limit,
                },
            );
        }
        let notice = self.stamp(
            ActionMessage::new(ActionCode::TimeGrant)
                .with_source(fed_id)
                .with_time(grant.time),
        );
        outbound.push(Outbound::to_parent(notice));
    }

    fn report_aggregate(&mut self, outbound: &mut Vec<Outbound>) {
        if self.node_id.is_none() || self.phase != CorePhase::Executing {
            return;
        }
        for fed in self.federates.values() {
            if fed.state == FederateState::Executing {
                self.aggregate.update(fed.id, fed.coordinator.timing_info());
            }
        }
        if let Some(aggregate) = self.aggregate.changed_aggregate() {
            let payload = encode_payload(&aggregate).unwrap_or_default();
            let report = self.stamp(
                ActionMessage::new(ActionCode::TimeDependency)
                    .with_time(aggregate.time_next)
                    .with_payload(payload),
            );
            outbound.push(Outbound::to_parent(report));
        }
    }

    // ── Federate API: time ──

    fn handle_time_request(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let fed_local = message.source.local();
        let iterate = message.flag(FLAG_ITERATE);
        {
            let Some(fed) = self.federates.get_mut(&fed_local) else {
                return self.fail(
                    message.message_id,
                    FederationError::InvalidHandle(message.source),
                );
            };
            if fed.state != FederateState::Executing {
                let state = fed.state;
                return self.fail(message.message_id, FederationError::InvalidState(state));
            }
            if fed.pending_time.is_some() {
                // At most one in-flight time advance per federate.
                let state = fed.state;
                return self.fail(message.message_id, FederationError::InvalidState(state));
            }
            fed.pending_time = Some(message.message_id);
        }
        let mut outbound = Vec::new();
        let mut queue = VecDeque::new();
        let out = {
            let Some(fed) = self.federates.get_mut(&fed_local) else {
                return Vec::new();
            };
            fed.coordinator.request_time(message.time, iterate)
        };
        queue.extend(out.updates);
        if let Some(grant) = out.grant {
            self.finish_grant(fed_local, grant, &mut queue, &mut outbound);
        }
        self.flush_messages(queue, &mut outbound);
        outbound
    }

    // ── Federate API: value plane ──

    fn handle_publish_api(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let fed_local = message.source.local();
        let (fed_state, granted) = match self.federates.get(&fed_local) {
            Some(fed) => (fed.state, fed.coordinator.granted()),
            None => {
                return self.fail(
                    message.message_id,
                    FederationError::InvalidHandle(message.source),
                )
            }
        };
        if fed_state != FederateState::Executing {
            return self.fail(message.message_id, FederationError::InvalidState(fed_state));
        }
        let pub_local = message.dest.local();
        let publishes: Vec<ActionMessage> = {
            let Some(publication) = self.publications.get_mut(&pub_local) else {
                return self.fail(
                    message.message_id,
                    FederationError::InvalidHandle(message.dest),
                );
            };
            if publication.info.owner != message.source {
                return self.fail(
                    message.message_id,
                    FederationError::InvalidHandle(message.dest),
                );
            }
            let pub_id = publication.info.id;
            publication
                .subscribers
                .clone()
                .into_iter()
                .map(|input| {
                    publication.next_seq = publication.next_seq.wrapping_add(1);
                    let mut m = ActionMessage::new(ActionCode::Publish)
                        .with_source(pub_id)
                        .with_dest(input)
                        .with_time(granted)
                        .with_payload(message.payload.clone());
                    m.counter = publication.next_seq;
                    m
                })
                .collect()
        };
        self.pending.complete(message.message_id, ApiReply::Ack);

        let mut outbound = Vec::new();
        let queue: VecDeque<ActionMessage> = publishes
            .into_iter()
            .map(|m| self.stamp(m))
            .collect();
        self.flush_messages(queue, &mut outbound);
        outbound
    }

    fn with_owned_input<F>(&mut self, message: &ActionMessage, f: F) -> Vec<Outbound>
    where
        F: FnOnce(&mut InputHandle) -> ApiReply,
    {
        let fed_local = message.source.local();
        let fed_state = match self.federates.get(&fed_local) {
            Some(fed) => fed.state,
            None => {
                return self.fail(
                    message.message_id,
                    FederationError::InvalidHandle(message.source),
                )
            }
        };
        if fed_state != FederateState::Executing {
            return self.fail(message.message_id, FederationError::InvalidState(fed_state));
        }
        let Some(input) = self.inputs.get_mut(&message.dest.local()) else {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.dest),
            );
        };
        if input.info.owner != message.source {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.dest),
            );
        }
        let reply = f(input);
        self.pending.complete(message.message_id, reply);
        Vec::new()
    }

    fn handle_set_default(&mut self, message: ActionMessage) -> Vec<Outbound> {
        // Defaults may be set in any pre-finalize state.
        let Some(input) = self.inputs.get_mut(&message.dest.local()) else {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.dest),
            );
        };
        if input.info.owner != message.source {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.dest),
            );
        }
        input.cell.set_default(message.payload);
        self.pending.complete(message.message_id, ApiReply::Ack);
        Vec::new()
    }

    fn handle_query_updates(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let fed_local = message.source.local();
        let Some(fed) = self.federates.get(&fed_local) else {
            return self.fail(
                message.message_id,
                FederationError::InvalidHandle(message.source),
            );
        };
        let owner = fed.id;
        let mut updated: Vec<GlobalId> = self
            .inputs
            .values()
            .filter(|i| i.info.owner == owner && i.cell.is_updated())
            .map(|i| i.info.id)
            .collect();
        updated.sort();
        self.pending
            .complete(message.message_id, ApiReply::Updates(updated));
        Vec::new()
    }

    fn handle_option(&mut self, message: ActionMessage, set: bool) -> Vec<Outbound> {
        let local = message.dest.local();
        let reply = if set {
            match decode_payload::<OptionUpdate>(&message.payload) {
                Ok(update) => {
                    if let Some(publication) = self.publications.get_mut(&local) {
                        publication.info.flags.set(update.option, update.value);
                        ApiReply::Ack
                    } else if let Some(input) = self.inputs.get_mut(&local) {
                        input.info.flags.set(update.option, update.value);
                        input.cell.flags_mut().set(update.option, update.value);
                        ApiReply::Ack
                    } else {
                        ApiReply::Failed(FederationError::InvalidHandle(message.dest))
                    }
                }
                Err(err) => ApiReply::Failed(FederationError::Internal(err.to_string())),
            }
        } else {
            match decode_payload::<OptionUpdate>(&message.payload) {
                Ok(update) => {
                    if let Some(publication) = self.publications.get(&local) {
                        ApiReply::Flag(publication.info.flags.get(update.option))
                    } else if let Some(input) = self.inputs.get(&local) {
                        ApiReply::Flag(input.info.flags.get(update.option))
                    } else {
                        ApiReply::Failed(FederationError::InvalidHandle(message.dest))
                    }
                }
                Err(err) => ApiReply::Failed(FederationError::Internal(err.to_string())),
            }
        };
        self.pending.complete(message.message_id, reply);
        Vec::new()
    }

    // ── Finalize ──

    fn handle_finalize(&mut self, message: ActionMessage) -> Vec<Outbound> {
        let fed_local = message.source.local();
        let (fed_id, dependents, dependencies, pending_time) = {
            let Some(fed) = self.federates.get_mut(&fed_local) else {
                return self.fail(
                    message.message_id,
                    FederationError::InvalidHandle(message.source),
                );
            };
            if fed.state >= FederateState::Finalizing {
                self.pending.complete(message.message_id, ApiReply::Ack);
                return Vec::new();
            }
            fed.state = FederateState::Finalizing;
            let dependencies: Vec<GlobalId> =
                fed.coordinator.dependencies().iter().map(|d| d.id).collect();
            (
                fed.id,
                fed.coordinator.dependents().to_vec(),
                dependencies,
                fed.pending_time.take(),
            )
        };
        if let Some(id) = pending_time {
            self.pending
                .complete(id, ApiReply::Failed(FederationError::Disconnected));
        }

        let mut outbound = Vec::new();
        // Tear both edge directions: dependents stop being constrained
        // by us, and the things we depended on stop reporting to us.
        let mut queue: VecDeque<ActionMessage> = dependents
            .into_iter()
            .map(|dependent| {
                ActionMessage::new(ActionCode::RemoveDependency)
                    .with_source(fed_id)
                    .with_dest(dependent)
            })
            .collect();
        queue.extend(dependencies.into_iter().map(|dependency| {
            ActionMessage::new(ActionCode::RemoveDependent)
                .with_source(fed_id)
                .with_dest(dependency)
        }));
        let notice = self.stamp(ActionMessage::new(ActionCode::Disconnect).with_source(fed_id));
        outbound.push(Outbound::to_parent(notice));

        if let Some(fed) = self.federates.get_mut(&fed_local) {
            fed.state = FederateState::Finalized;
        }
        self.aggregate.remove(fed_id);
        info!(core = %self.identifier, federate = %fed_id, "federate finalized");
        self.flush_messages(queue, &mut outbound);
        self.pending.complete(message.message_id, ApiReply::Ack);

        if self
            .federates
            .values()
            .all(|f| f.state >= FederateState::Finalized)
        {
            info!(core = %self.identifier, "all federates finalized, disconnecting");
            let notice = self.stamp(ActionMessage::new(ActionCode::Disconnect));
            outbound.push(Outbound::to_parent(notice));
            self.halted = true;
            self.finished = true;
        }
        outbound
    }

    // ── Errors & disconnect ──

    fn handle_error(&mut self, envelope: Envelope) -> Vec<Outbound> {
        let message = envelope.message;
        if message.name == "transport-failure" && !message.source.is_valid() {
            // The broker link is gone. Stay alive so API calls can be
            // failed fast, but the federation is over for this core.
            warn!(core = %self.identifier, "broker link failed");
            let err = FederationError::TransportFailure("broker link".into());
            self.mark_errored(&err);
            return Vec::new();
        }
        let err =
            FederationError::from_code(&message.name, &String::from_utf8_lossy(&message.payload));
        // Correlated failure of one blocking call: replies echo the
        // request's message id and its source as the destination.
        // Uncorrelated errors carry message id zero.
        if message.dest.is_valid()
            && message.message_id != 0
            && self
                .pending
                .complete(message.message_id, ApiReply::Failed(err.clone()))
        {
            if let Some(handle) = self.pending_registrations.remove(&message.message_id) {
                self.publications.remove(&handle.local());
                self.inputs.remove(&handle.local());
            }
            return Vec::new();
        }
        if !message.dest.is_valid() {
            // Structural broadcast, e.g. the root's init timeout.
            warn!(core = %self.identifier, code = %message.name, "federation error received");
            self.mark_errored(&err);
            return Vec::new();
        }
        if self.is_local(message.dest) && message.dest.local() != 0 {
            let fed_local = message.dest.local();
            if let Some(fed) = self.federates.get_mut(&fed_local) {
                warn!(core = %self.identifier, federate = %fed.name, %err, "federate error");
                if fed.state.can_advance_to(FederateState::Errored) {
                    fed.state = FederateState::Errored;
                }
                for id in [
                    fed.pending_init.take(),
                    fed.pending_exec.take(),
                    fed.pending_time.take(),
                ]
                .into_iter()
                .flatten()
                {
                    self.pending.complete(id, ApiReply::Failed(err.clone()));
                }
            }
            return Vec::new();
        }
        warn!(core = %self.identifier, msg = %message, "unattributable error");
        Vec::new()
    }

    fn mark_errored(&mut self, err: &FederationError) {
        self.errored = true;
        for fed in self.federates.values_mut() {
            if fed.state.can_advance_to(FederateState::Errored) {
                fed.state = FederateState::Errored;
            }
        }
        self.pending.fail_all(err);
    }

    fn handle_parent_disconnect(&mut self) -> Vec<Outbound> {
        info!(core = %self.identifier, "broker disconnected");
        if !self.errored {
            self.mark_errored(&FederationError::Disconnected);
        }
        self.finished = true;
        Vec::new()
    }

    // ── Queries ──

    fn handle_query(&mut self, envelope: Envelope) -> Vec<Outbound> {
        let message = envelope.message;
        let query = String::from_utf8_lossy(&message.payload).to_string();

        if envelope.route.is_local() {
            // Facade call: answer locally when the target is ours,
            // otherwise forward upstream and wait for the routed reply.
            if message.name == "core" || message.name == self.identifier {
                let answer = self.answer_core_query(&query);
                self.pending.complete(message.message_id, ApiReply::Query(answer));
                return Vec::new();
            }
            if let Some(&fed_local) = self.federate_names.get(&message.name) {
                let answer = self.answer_federate_query(fed_local, &query);
                self.pending.complete(message.message_id, ApiReply::Query(answer));
                return Vec::new();
            }
            return vec![Outbound::to_parent(message)];
        }

        // Network query addressed to this core or one of its federates.
        let answer = if message.dest.local() == 0 {
            self.answer_core_query(&query)
        } else {
            self.answer_federate_query(message.dest.local(), &query)
        };
        let mut reply = ActionMessage::new(ActionCode::QueryReply)
            .with_dest(message.source)
            .with_payload(answer.into_bytes());
        reply.message_id = message.message_id;
        reply.source = self.my_id();
        vec![Outbound::to_parent(reply)]
    }

    fn answer_core_query(&self, query: &str) -> String {
        match query {
            "name" => self.identifier.clone(),
            "state" => match (self.errored, self.phase) {
                (true, _) => "errored".into(),
                (_, CorePhase::Connecting) => "connecting".into(),
                (_, CorePhase::Operating) => "operating".into(),
                (_, CorePhase::Initializing) => "initializing".into(),
                (_, CorePhase::Executing) => "executing".into(),
            },
            "current_time" => {
                let min = self
                    .federates
                    .values()
                    .filter(|f| f.state == FederateState::Executing)
                    .map(|f| f.coordinator.granted())
                    .min()
                    .unwrap_or(SimTime::ZERO);
                format!("{}", min.as_seconds())
            }
            "federates" => {
                let mut names: Vec<&str> =
                    self.federates.values().map(|f| f.name.as_str()).collect();
                names.sort_unstable();
                bracket_list(&names)
            }
            "publications" => {
                let mut keys: Vec<&str> = self
                    .publications
                    .values()
                    .map(|p| p.info.key.as_str())
                    .collect();
                keys.sort_unstable();
                bracket_list(&keys)
            }
            "inputs" => {
                let mut keys: Vec<&str> =
                    self.inputs.values().map(|i| i.info.key.as_str()).collect();
                keys.sort_unstable();
                bracket_list(&keys)
            }
            _ => "#invalid".into(),
        }
    }

    fn answer_federate_query(&self, fed_local: u16, query: &str) -> String {
        let Some(fed) = self.federates.get(&fed_local) else {
            return "#invalid".into();
        };
        match query {
            "name" => fed.name.clone(),
            "state" => fed.state.to_string(),
            "current_time" => format!("{}", fed.coordinator.granted().as_seconds()),
            "dependencies" => {
                let ids: Vec<String> = fed
                    .coordinator
                    .dependencies()
                    .iter()
                    .map(|d| d.id.to_string())
                    .collect();
                let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                bracket_list(&refs)
            }
            "publications" => {
                let mut keys: Vec<&str> = self
                    .publications
                    .values()
                    .filter(|p| p.info.owner == fed.id)
                    .map(|p| p.info.key.as_str())
                    .collect();
                keys.sort_unstable();
                bracket_list(&keys)
            }
            _ => "#invalid".into(),
        }
    }

    /// After a structural error the node keeps draining its queue but
    /// every new blocking call fails immediately.
    fn reject_if_errored(&self, envelope: &Envelope) -> Option<Vec<Outbound>> {
        if self.errored
            && envelope.route.is_local()
            && envelope.message.message_id != 0
            && envelope.message.action != ActionCode::Tick
        {
            return Some(self.fail(envelope.message.message_id, FederationError::Disconnected));
        }
        None
    }

    fn handle_tick(&mut self) -> Vec<Outbound> {
        if self.node_id.is_none() && self.now >= self.options.node.timeout {
            warn!(core = %self.identifier, "no broker connection within timeout");
            self.mark_errored(&FederationError::InitTimeout);
            self.finished = true;
            return Vec::new();
        }
        // Drive deferred iterative requests so they make rounds even in
        // silence.
        let locals: Vec<u16> = self
            .federates
            .iter()
            .filter(|(_, f)| f.state == FederateState::Executing && f.coordinator.has_request())
            .map(|(local, _)| *local)
            .collect();
        let mut outbound = Vec::new();
        for local in locals {
            let out = match self.federates.get_mut(&local) {
                Some(fed) => fed.coordinator.reevaluate(),
                None => continue,
            };
            let mut queue: VecDeque<ActionMessage> = out.updates.into();
            if let Some(grant) = out.grant {
                self.finish_grant(local, grant, &mut queue, &mut outbound);
            }
            self.flush_messages(queue, &mut outbound);
        }
        outbound
    }
}

impl MessageProcessor for CoreState {
    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn process_priority_command(
        &mut self,
        envelope: Envelope,
    ) -> Result<Vec<Outbound>, FederationError> {
        trace!(core = %self.identifier, msg = %envelope.message, "priority command");
        if let Some(outbound) = self.reject_if_errored(&envelope) {
            return Ok(outbound);
        }
        let message = envelope.message.clone();
        let outbound = match message.action {
            ActionCode::RegisterCore => self.handle_connect(message),
            ActionCode::ConnectionAck => self.handle_connection_ack(message),
            ActionCode::RegisterFederate => self.handle_join(message),
            ActionCode::FederateAck => {
                self.pending
                    .complete(message.message_id, ApiReply::Handle(message.dest));
                Vec::new()
            }
            ActionCode::RegisterPublication | ActionCode::RegisterInput => {
                self.handle_register_handle(message)
            }
            ActionCode::AddSourceTarget => self.handle_add_source_target(message),
            ActionCode::RegistrationAck => self.handle_registration_ack(message),
            ActionCode::InitRequest => self.handle_enter_init(message),
            ActionCode::InitGrant => self.handle_init_grant(),
            ActionCode::ExecRequest => self.handle_enter_exec(message),
            ActionCode::ExecGrant => self.handle_exec_grant(),
            ActionCode::Disconnect => self.handle_parent_disconnect(),
            ActionCode::AddSubscriber => {
                if let Some(publication) = self.publications.get_mut(&message.dest.local()) {
                    publication.subscribers.push(message.source);
                }
                Vec::new()
            }
            ActionCode::SourceResolved => {
                if let Some(input) = self.inputs.get_mut(&message.dest.local()) {
                    input.sources.push(message.source);
                }
                Vec::new()
            }
            ActionCode::AddDependency | ActionCode::AddDependent => {
                let mut outbound = Vec::new();
                self.flush_messages(VecDeque::from([message]), &mut outbound);
                outbound
            }
            ActionCode::Error => self.handle_error(envelope),
            ActionCode::Query => self.handle_query(envelope),
            ActionCode::QueryReply => {
                let text = String::from_utf8_lossy(&message.payload).to_string();
                self.pending
                    .complete(message.message_id, ApiReply::Query(text));
                Vec::new()
            }
            other => {
                warn!(core = %self.identifier, action = other.name(), "unexpected priority command");
                Vec::new()
            }
        };
        Ok(outbound)
    }

    fn process_command(&mut self, envelope: Envelope) -> Result<Vec<Outbound>, FederationError> {
        if let Some(outbound) = self.reject_if_errored(&envelope) {
            return Ok(outbound);
        }
        let message = envelope.message;
        let outbound = match message.action {
            ActionCode::Tick => self.handle_tick(),
            ActionCode::TimeRequest if envelope.route.is_local() => {
                self.handle_time_request(message)
            }
            ActionCode::Publish if envelope.route.is_local() => self.handle_publish_api(message),
            ActionCode::SetDefault => self.handle_set_default(message),
            ActionCode::ReadValue => {
                self.with_owned_input(&message, |input| ApiReply::Value(input.cell.read()))
            }
            ActionCode::CheckUpdate => {
                self.with_owned_input(&message, |input| ApiReply::Flag(input.cell.is_updated()))
            }
            ActionCode::LastUpdateTime => self.with_owned_input(&message, |input| {
                ApiReply::TimeValue(input.cell.last_update_time())
            }),
            ActionCode::QueryUpdates => self.handle_query_updates(message),
            ActionCode::SetHandleOption => self.handle_option(message, true),
            ActionCode::GetHandleOption => self.handle_option(message, false),
            ActionCode::FinalizeFederate => self.handle_finalize(message),
            ActionCode::Publish
            | ActionCode::TimeDependency
            | ActionCode::RemoveDependency
            | ActionCode::RemoveDependent => {
                let mut outbound = Vec::new();
                self.flush_messages(VecDeque::from([message]), &mut outbound);
                outbound
            }
            other => {
                trace!(core = %self.identifier, action = other.name(), "dropping command");
                Vec::new()
            }
        };
        Ok(outbound)
    }

    fn process_disconnect(&mut self) -> Vec<Outbound> {
        if self.finished {
            return Vec::new();
        }
        info!(core = %self.identifier, "disconnecting");
        self.pending.fail_all(&FederationError::Disconnected);
        let mut outbound = Vec::new();
        if self.node_id.is_some() {
            let notice = self.stamp(ActionMessage::new(ActionCode::Disconnect));
            outbound.push(Outbound::to_parent(notice));
        }
        self.halted = true;
        self.finished = true;
        outbound
    }

    fn halted(&self) -> bool {
        self.halted
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

fn bracket_list(names: &[&str]) -> String {
    let mut out = String::from("[");
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        out.push_str(name);
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::Receiver;
    use tandem_types::{HandleFlags, RouteId};

    fn parent(message: ActionMessage) -> Envelope {
        Envelope {
            route: RouteId::PARENT,
            message,
        }
    }

    /// A connected core driven directly, with the parent side simulated.
    struct Rig {
        state: CoreState,
        pending: Arc<PendingCalls>,
    }

    impl Rig {
        fn new() -> Rig {
            let pending = Arc::new(PendingCalls::new());
            let mut state = CoreState::new(CoreOptions::named("rig"), Arc::clone(&pending));
            let (id, rx) = pending.register();
            let mut connect = ActionMessage::new(ActionCode::RegisterCore);
            connect.message_id = id;
            state
                .process_priority_command(Envelope::local(connect))
                .unwrap();
            let ack = ActionMessage::new(ActionCode::ConnectionAck)
                .with_dest(GlobalId::for_node(NodeId(2)))
                .with_name("rig");
            state.process_priority_command(parent(ack)).unwrap();
            assert_eq!(rx.try_recv().unwrap(), ApiReply::Ack);
            Rig { state, pending }
        }

        fn api(&mut self, mut message: ActionMessage) -> (Vec<Outbound>, Receiver<ApiReply>) {
            let (id, rx) = self.pending.register();
            message.message_id = id;
            let out = if message.action.is_priority() {
                self.state
                    .process_priority_command(Envelope::local(message))
                    .unwrap()
            } else {
                self.state
                    .process_command(Envelope::local(message))
                    .unwrap()
            };
            (out, rx)
        }

        fn join(&mut self, name: &str) -> GlobalId {
            let (out, rx) = self.api(ActionMessage::new(ActionCode::RegisterFederate).with_name(name));
            let fed = out[0].message.source;
            let mut ack = ActionMessage::new(ActionCode::FederateAck).with_dest(fed);
            ack.message_id = out[0].message.message_id;
            self.state.process_priority_command(parent(ack)).unwrap();
            assert_eq!(rx.try_recv().unwrap(), ApiReply::Handle(fed));
            fed
        }

        fn register_publication(
            &mut self,
            fed: GlobalId,
            key: &str,
        ) -> Result<GlobalId, FederationError> {
            let payload = encode_payload(&HandleRegistration {
                kind: HandleKind::Publication,
                type_tag: "double".into(),
                units: String::new(),
                flags: HandleFlags::default(),
            })
            .unwrap();
            let (out, rx) = self.api(
                ActionMessage::new(ActionCode::RegisterPublication)
                    .with_source(fed)
                    .with_name(key)
                    .with_payload(payload),
            );
            match rx.try_recv() {
                Ok(ApiReply::Failed(err)) => return Err(err),
                Ok(other) => panic!("unexpected reply {other:?}"),
                Err(_) => {}
            }
            // Echo the root's ack.
            let handle = out[0].message.source;
            let mut ack = ActionMessage::new(ActionCode::RegistrationAck).with_dest(handle);
            ack.message_id = out[0].message.message_id;
            self.state.process_priority_command(parent(ack)).unwrap();
            match rx.try_recv().unwrap() {
                ApiReply::Handle(id) => Ok(id),
                other => panic!("unexpected reply {other:?}"),
            }
        }

        fn advance_to_executing(&mut self, feds: &[GlobalId]) {
            let mut receivers = Vec::new();
            for &fed in feds {
                let (_, rx) = self.api(ActionMessage::new(ActionCode::InitRequest).with_source(fed));
                receivers.push(rx);
            }
            self.state
                .process_priority_command(parent(ActionMessage::new(ActionCode::InitGrant)))
                .unwrap();
            for rx in receivers {
                assert_eq!(rx.try_recv().unwrap(), ApiReply::Ack);
            }

            let mut receivers = Vec::new();
            for &fed in feds {
                let (_, rx) = self.api(ActionMessage::new(ActionCode::ExecRequest).with_source(fed));
                receivers.push(rx);
            }
            self.state
                .process_priority_command(parent(ActionMessage::new(ActionCode::ExecGrant)))
                .unwrap();
            for rx in receivers {
                assert_eq!(rx.try_recv().unwrap(), ApiReply::Ack);
            }
        }
    }

    #[test]
    fn test_local_name_collision() {
        let mut rig = Rig::new();
        let fed = rig.join("alpha");
        rig.register_publication(fed, "x").unwrap();
        let err = rig.register_publication(fed, "x").unwrap_err();
        assert_eq!(err, FederationError::LocalNameCollision("x".into()));
    }

    #[test]
    fn test_registration_only_in_created() {
        let mut rig = Rig::new();
        let fed = rig.join("alpha");
        rig.advance_to_executing(&[fed]);
        let err = rig.register_publication(fed, "late").unwrap_err();
        assert_eq!(
            err,
            FederationError::InvalidState(FederateState::Executing)
        );
    }

    #[test]
    fn test_time_request_only_in_executing() {
        let mut rig = Rig::new();
        let fed = rig.join("alpha");
        let (_, rx) = rig.api(
            ActionMessage::new(ActionCode::TimeRequest)
                .with_source(fed)
                .with_time(SimTime::from_seconds(1.0)),
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ApiReply::Failed(FederationError::InvalidState(FederateState::Created))
        );
    }

    #[test]
    fn test_single_outstanding_time_request() {
        let mut rig = Rig::new();
        let fed = rig.join("alpha");
        rig.advance_to_executing(&[fed]);
        // Block the federate behind a remote dependency.
        let peer = GlobalId::new(NodeId(3), 1);
        rig.state
            .process_priority_command(parent(
                ActionMessage::new(ActionCode::AddDependency)
                    .with_source(peer)
                    .with_dest(fed),
            ))
            .unwrap();

        let (_, first) = rig.api(
            ActionMessage::new(ActionCode::TimeRequest)
                .with_source(fed)
                .with_time(SimTime::from_seconds(1.0)),
        );
        assert!(first.try_recv().is_err(), "request must stay pending");

        let (_, second) = rig.api(
            ActionMessage::new(ActionCode::TimeRequest)
                .with_source(fed)
                .with_time(SimTime::from_seconds(2.0)),
        );
        assert_eq!(
            second.try_recv().unwrap(),
            ApiReply::Failed(FederationError::InvalidState(FederateState::Executing))
        );

        // The peer reports past the request; the first call completes.
        let info = TimingInfo {
            time_next: SimTime::from_seconds(5.0),
            time_minde: SimTime::MAX_TIME,
            time_grant: SimTime::ZERO,
        };
        let report = ActionMessage::new(ActionCode::TimeDependency)
            .with_source(peer)
            .with_dest(fed)
            .with_payload(encode_payload(&info).unwrap());
        rig.state.process_command(parent(report)).unwrap();
        assert_eq!(
            first.try_recv().unwrap(),
            ApiReply::Time {
                granted: SimTime::from_seconds(1.0),
                iteration_limit: false
            }
        );
    }

    #[test]
    fn test_publish_requires_executing_federate() {
        let mut rig = Rig::new();
        let fed = rig.join("alpha");
        let publication = rig.register_publication(fed, "x").unwrap();
        let (_, rx) = rig.api(
            ActionMessage::new(ActionCode::Publish)
                .with_source(fed)
                .with_dest(publication)
                .with_payload(b"1".to_vec()),
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ApiReply::Failed(FederationError::InvalidState(FederateState::Created))
        );
    }

    #[test]
    fn test_broadcast_error_fails_blocked_barrier() {
        let mut rig = Rig::new();
        let fed = rig.join("alpha");
        let (_, rx) = rig.api(ActionMessage::new(ActionCode::InitRequest).with_source(fed));
        assert!(rx.try_recv().is_err());

        let mut error = ActionMessage::new(ActionCode::Error).with_name("init-timeout");
        error.message_id = 9999;
        rig.state.process_priority_command(parent(error)).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ApiReply::Failed(FederationError::InitTimeout)
        );
    }
}

