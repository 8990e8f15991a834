//! The broker state machine.

use crate::{BrokerOptions, InterfaceRegistry, RoutingTable};
use crate::registry::{InputEntry, PublicationEntry};
use std::collections::HashMap;
use std::time::Duration;
use tandem_coordination::SubtreeTimeState;
use tandem_protocol::{
    decode_payload, encode_payload, ActionCode, ActionMessage, HandleRegistration, TimingInfo,
    FLAG_ERROR,
};
use tandem_runtime::{Envelope, MessageProcessor, Outbound};
use tandem_types::{FederationError, GlobalId, HandleKind, NodeId, RouteId};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrokerPhase {
    /// Waiting for the parent's connection ack (sub-brokers only).
    Connecting,
    /// Accepting registrations.
    Operating,
    /// Initialization granted, bindings frozen.
    Initializing,
    /// Federation executing.
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    Core,
    Broker,
}

#[derive(Debug)]
struct ChildInfo {
    name: String,
    kind: ChildKind,
    node_id: Option<NodeId>,
    init_requested: bool,
    exec_requested: bool,
    disconnected: bool,
}

/// Message-processing state of one broker.
///
/// The root broker additionally owns the federation name table and runs
/// the barrier/resolution logic; interior brokers forward registrations
/// up and fan grants down. All per-federate time grants happen at the
/// owning cores; the broker routes their dependency traffic and keeps
/// the aggregate subtree picture.
pub struct BrokerState {
    identifier: String,
    options: BrokerOptions,
    is_root: bool,
    node_id: Option<NodeId>,
    phase: BrokerPhase,
    now: Duration,
    children: HashMap<RouteId, ChildInfo>,
    routing: RoutingTable,
    /// Registrations forwarded upward, awaiting the ack that names them.
    pending_registrations: HashMap<String, RouteId>,
    /// Next node id to hand out (root only).
    next_node: u16,
    registry: InterfaceRegistry,
    subtree: SubtreeTimeState,
    federate_count: usize,
    init_sent: bool,
    init_granted: bool,
    exec_sent: bool,
    exec_granted: bool,
    errored: bool,
    halted: bool,
    finished: bool,
    next_message_id: u32,
}

impl BrokerState {
    pub fn new(options: BrokerOptions, is_root: bool) -> Self {
        let identifier = options.node.identifier.clone();
        BrokerState {
            identifier,
            options,
            is_root,
            node_id: is_root.then_some(NodeId::ROOT),
            phase: if is_root {
                BrokerPhase::Operating
            } else {
                BrokerPhase::Connecting
            },
            now: Duration::ZERO,
            children: HashMap::new(),
            routing: RoutingTable::new(),
            pending_registrations: HashMap::new(),
            next_node: NodeId::ROOT.0 + 1,
            registry: InterfaceRegistry::new(),
            subtree: SubtreeTimeState::new(),
            federate_count: 0,
            init_sent: false,
            init_granted: false,
            exec_sent: false,
            exec_granted: false,
            errored: false,
            halted: false,
            finished: false,
            next_message_id: 1,
        }
    }

    fn my_id(&self) -> GlobalId {
        self.node_id.map(GlobalId::for_node).unwrap_or_default()
    }

    fn stamp(&mut self, mut message: ActionMessage) -> ActionMessage {
        message.message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        if !message.source.is_valid() {
            message.source = self.my_id();
        }
        message
    }

    /// Whether a message is addressed to this broker itself.
    fn addressed_to_me(&self, message: &ActionMessage) -> bool {
        !message.dest.is_valid() || message.dest == self.my_id()
    }

    // ── Routing ──

    /// Forward by destination id; unknown destinations go to the parent
    /// unless they arrived from there.
    fn route(&self, envelope: Envelope) -> Vec<Outbound> {
        let dest = envelope.message.dest;
        match self.routing.route_for(dest) {
            Some(route) => vec![Outbound::new(route, envelope.message)],
            None if !self.is_root && envelope.route != RouteId::PARENT => {
                vec![Outbound::to_parent(envelope.message)]
            }
            None => {
                warn!(broker = %self.identifier, %dest, msg = %envelope.message, "unroutable message dropped");
                Vec::new()
            }
        }
    }

    fn route_message(&self, message: ActionMessage) -> Vec<Outbound> {
        self.route(Envelope::local(message))
    }

    fn broadcast(&mut self, template: ActionMessage) -> Vec<Outbound> {
        self.children
            .iter()
            .filter(|(_, child)| !child.disconnected)
            .map(|(route, _)| Outbound::new(*route, template.clone()))
            .collect()
    }

    fn error_reply(&mut self, request: &ActionMessage, err: &FederationError) -> Vec<Outbound> {
        let mut message = ActionMessage::new(ActionCode::Error)
            .with_dest(request.source)
            .with_name(err.code())
            .with_payload(err.detail().into_bytes());
        message.set_flag(FLAG_ERROR);
        message.message_id = request.message_id;
        message.source = self.my_id();
        self.route_message(message)
    }

    // ── Connection & registration ──

    fn handle_child_registration(&mut self, envelope: Envelope) -> Vec<Outbound> {
        if envelope.route.is_local() {
            // Our own bootstrap: introduce ourselves upstream.
            let message = self
                .stamp(ActionMessage::new(ActionCode::RegisterBroker).with_name(self.identifier.clone()));
            return vec![Outbound::to_parent(message)];
        }

        let kind = if envelope.message.action == ActionCode::RegisterCore {
            ChildKind::Core
        } else {
            ChildKind::Broker
        };
        let name = envelope.message.name.clone();
        let direct_child = !self.children.contains_key(&envelope.route);
        if direct_child {
            self.children.insert(
                envelope.route,
                ChildInfo {
                    name: name.clone(),
                    kind,
                    node_id: None,
                    init_requested: false,
                    exec_requested: false,
                    disconnected: false,
                },
            );
            debug!(broker = %self.identifier, child = %name, ?kind, "child attached");
        }

        if self.is_root {
            let node = NodeId(self.next_node);
            self.next_node += 1;
            self.routing.add_node(node, envelope.route);
            if direct_child {
                if let Some(child) = self.children.get_mut(&envelope.route) {
                    child.node_id = Some(node);
                }
            }
            info!(broker = %self.identifier, child = %name, %node, "assigned node id");
            let ack = self.stamp(
                ActionMessage::new(ActionCode::ConnectionAck)
                    .with_dest(GlobalId::for_node(node))
                    .with_name(name),
            );
            vec![Outbound::new(envelope.route, ack)]
        } else {
            self.pending_registrations.insert(name, envelope.route);
            vec![Outbound::to_parent(envelope.message)]
        }
    }

    fn handle_connection_ack(&mut self, envelope: Envelope) -> Vec<Outbound> {
        let message = envelope.message;
        if message.name == self.identifier && self.node_id.is_none() {
            self.node_id = Some(message.dest.node());
            self.phase = BrokerPhase::Operating;
            info!(broker = %self.identifier, node = %message.dest.node(), "connected to parent");
            return Vec::new();
        }
        let Some(route) = self.pending_registrations.remove(&message.name) else {
            warn!(broker = %self.identifier, name = %message.name, "ack for unknown registration");
            return Vec::new();
        };
        self.routing.add_node(message.dest.node(), route);
        if let Some(child) = self.children.get_mut(&route) {
            if child.name == message.name {
                child.node_id = Some(message.dest.node());
            }
        }
        vec![Outbound::new(route, message)]
    }

    fn handle_register_federate(&mut self, envelope: Envelope) -> Vec<Outbound> {
        if !self.is_root {
            return vec![Outbound::to_parent(envelope.message)];
        }
        let message = envelope.message;
        match self
            .registry
            .register_federate(&message.name, message.source)
        {
            Ok(()) => {
                self.federate_count += 1;
                let mut ack = ActionMessage::new(ActionCode::FederateAck)
                    .with_dest(message.source)
                    .with_name(message.name);
                ack.message_id = message.message_id;
                ack.source = self.my_id();
                let mut outbound = self.route_message(ack);
                // A newly arrived federate may complete the init barrier.
                outbound.extend(self.check_init_barrier());
                outbound
            }
            Err(err) => self.error_reply(&message, &err),
        }
    }

    fn handle_register_handle(&mut self, envelope: Envelope) -> Vec<Outbound> {
        if !self.is_root {
            return vec![Outbound::to_parent(envelope.message)];
        }
        let message = envelope.message;
        let registration: HandleRegistration = match decode_payload(&message.payload) {
            Ok(registration) => registration,
            Err(err) => {
                warn!(broker = %self.identifier, %err, "malformed handle registration");
                return self.error_reply(
                    &message,
                    &FederationError::Internal("malformed registration payload".into()),
                );
            }
        };
        let owner = GlobalId::new(message.source.node(), message.counter);
        let result = match registration.kind {
            HandleKind::Publication => self.registry.register_publication(
                &message.name,
                PublicationEntry {
                    id: message.source,
                    owner,
                    type_tag: registration.type_tag,
                    units: registration.units,
                    flags: registration.flags,
                    subscribers: Vec::new(),
                },
            ),
            HandleKind::Input => self.registry.register_input(
                &message.name,
                InputEntry {
                    id: message.source,
                    owner,
                    flags: registration.flags,
                    sources: Vec::new(),
                },
            ),
        };
        match result {
            Ok(()) => {
                let mut ack = ActionMessage::new(ActionCode::RegistrationAck)
                    .with_dest(message.source)
                    .with_name(message.name);
                ack.message_id = message.message_id;
                ack.source = self.my_id();
                self.route_message(ack)
            }
            Err(err) => self.error_reply(&message, &err),
        }
    }

    fn handle_add_source_target(&mut self, envelope: Envelope) -> Vec<Outbound> {
        if !self.is_root {
            return vec![Outbound::to_parent(envelope.message)];
        }
        let message = envelope.message;
        // dest carries the owning federate for failure attribution.
        self.registry
            .add_source_target(message.source, message.dest, &message.name);
        let mut ack = ActionMessage::new(ActionCode::RegistrationAck)
            .with_dest(message.source)
            .with_name(message.name);
        ack.message_id = message.message_id;
        ack.source = self.my_id();
        self.route_message(ack)
    }

    // ── Barriers ──

    fn handle_init_request(&mut self, envelope: Envelope) -> Vec<Outbound> {
        if let Some(child) = self.children.get_mut(&envelope.route) {
            child.init_requested = true;
        }
        self.check_init_barrier()
    }

    fn check_init_barrier(&mut self) -> Vec<Outbound> {
        if self.init_granted || self.init_sent {
            return Vec::new();
        }
        let children_ready = !self.children.is_empty()
            && self
                .children
                .values()
                .all(|c| c.init_requested || c.disconnected);
        if !children_ready {
            return Vec::new();
        }
        if self.is_root {
            if self.registry.federate_count() < self.options.min_federates
                || self.children.len() < self.options.min_brokers
            {
                return Vec::new();
            }
            self.grant_initialization()
        } else {
            self.init_sent = true;
            let message = self.stamp(ActionMessage::new(ActionCode::InitRequest));
            vec![Outbound::to_parent(message)]
        }
    }

    /// Root only: resolve subscriptions, install bindings and dependency
    /// edges, report constraint failures, then grant initialization.
    fn grant_initialization(&mut self) -> Vec<Outbound> {
        let outcome = self.registry.resolve_targets();
        let mut outbound = Vec::new();

        for binding in &outcome.bindings {
            debug!(
                broker = %self.identifier,
                publication = %binding.publication,
                input = %binding.input,
                "binding resolved"
            );
            let subscriber = self.stamp(
                ActionMessage::new(ActionCode::AddSubscriber)
                    .with_source(binding.input)
                    .with_dest(binding.publication),
            );
            outbound.extend(self.route_message(subscriber));

            let payload = encode_payload(&HandleRegistration {
                kind: HandleKind::Publication,
                type_tag: binding.type_tag.clone(),
                units: binding.units.clone(),
                flags: Default::default(),
            })
            .unwrap_or_default();
            let resolved = self.stamp(
                ActionMessage::new(ActionCode::SourceResolved)
                    .with_source(binding.publication)
                    .with_dest(binding.input)
                    .with_payload(payload),
            );
            outbound.extend(self.route_message(resolved));

            if binding.publication_owner != binding.input_owner {
                let dependency = self.stamp(
                    ActionMessage::new(ActionCode::AddDependency)
                        .with_source(binding.publication_owner)
                        .with_dest(binding.input_owner),
                );
                outbound.extend(self.route_message(dependency));
                let dependent = self.stamp(
                    ActionMessage::new(ActionCode::AddDependent)
                        .with_source(binding.input_owner)
                        .with_dest(binding.publication_owner),
                );
                outbound.extend(self.route_message(dependent));
            }
        }

        for (owner, err) in &outcome.failures {
            warn!(broker = %self.identifier, %owner, %err, "initialization constraint failed");
            // message id stays zero: this error answers no specific
            // request, it is directed at the owning federate.
            let mut message = ActionMessage::new(ActionCode::Error)
                .with_dest(*owner)
                .with_name(err.code())
                .with_payload(err.detail().into_bytes());
            message.set_flag(FLAG_ERROR);
            message.source = self.my_id();
            outbound.extend(self.route_message(message));
        }

        self.init_granted = true;
        self.phase = BrokerPhase::Initializing;
        info!(broker = %self.identifier, "initialization granted");
        let grant = self.stamp(ActionMessage::new(ActionCode::InitGrant));
        outbound.extend(self.broadcast(grant));
        outbound
    }

    fn handle_init_grant(&mut self, _envelope: Envelope) -> Vec<Outbound> {
        self.init_granted = true;
        self.phase = BrokerPhase::Initializing;
        let grant = self.stamp(ActionMessage::new(ActionCode::InitGrant));
        self.broadcast(grant)
    }

    fn handle_exec_request(&mut self, envelope: Envelope) -> Vec<Outbound> {
        if let Some(child) = self.children.get_mut(&envelope.route) {
            child.exec_requested = true;
        }
        self.check_exec_barrier()
    }

    fn check_exec_barrier(&mut self) -> Vec<Outbound> {
        if self.exec_granted || self.exec_sent {
            return Vec::new();
        }
        let ready = !self.children.is_empty()
            && self
                .children
                .values()
                .all(|c| c.exec_requested || c.disconnected);
        if !ready {
            return Vec::new();
        }
        if self.is_root {
            self.exec_granted = true;
            self.phase = BrokerPhase::Executing;
            info!(broker = %self.identifier, "execution granted at time zero");
            let grant = self.stamp(ActionMessage::new(ActionCode::ExecGrant));
            self.broadcast(grant)
        } else {
            self.exec_sent = true;
            let message = self.stamp(ActionMessage::new(ActionCode::ExecRequest));
            vec![Outbound::to_parent(message)]
        }
    }

    fn handle_exec_grant(&mut self, _envelope: Envelope) -> Vec<Outbound> {
        self.exec_granted = true;
        self.phase = BrokerPhase::Executing;
        let grant = self.stamp(ActionMessage::new(ActionCode::ExecGrant));
        self.broadcast(grant)
    }

    // ── Disconnect & errors ──

    fn handle_disconnect(&mut self, envelope: Envelope) -> Vec<Outbound> {
        let message = envelope.message;
        if envelope.route == RouteId::PARENT {
            // The federation above us is gone.
            info!(broker = %self.identifier, "parent disconnected, shutting down subtree");
            let notice = self.stamp(ActionMessage::new(ActionCode::Disconnect));
            let outbound = self.broadcast(notice);
            self.finished = true;
            return outbound;
        }

        if message.source.is_node() {
            self.child_gone(envelope.route, message.source)
        } else {
            // Federate-level disconnect: maintain the root table, pass it
            // upward otherwise.
            if self.is_root {
                self.registry.remove_federate(message.source);
                Vec::new()
            } else {
                vec![Outbound::to_parent(message)]
            }
        }
    }

    fn child_gone(&mut self, route: RouteId, node: GlobalId) -> Vec<Outbound> {
        if let Some(child) = self.children.get_mut(&route) {
            if child.disconnected {
                return Vec::new();
            }
            child.disconnected = true;
            info!(broker = %self.identifier, child = %child.name, kind = ?child.kind, "child disconnected");
        }
        self.subtree.remove(node);
        self.routing.remove_route(route);

        let all_gone = self.children.values().all(|c| c.disconnected);
        if !all_gone {
            return Vec::new();
        }
        self.finished = true;
        if self.is_root {
            info!(broker = %self.identifier, "all children disconnected, federation complete");
            Vec::new()
        } else {
            let message = self.stamp(ActionMessage::new(ActionCode::Disconnect));
            vec![Outbound::to_parent(message)]
        }
    }

    fn handle_error(&mut self, envelope: Envelope) -> Vec<Outbound> {
        let message = envelope.message;
        // Locally injected transport failure: the link itself is gone.
        if message.name == "transport-failure" && !message.source.is_valid() {
            if envelope.route == RouteId::PARENT {
                warn!(broker = %self.identifier, "parent link failed");
                let notice = self.stamp(ActionMessage::new(ActionCode::Disconnect));
                let outbound = self.broadcast(notice);
                self.finished = true;
                return outbound;
            }
            warn!(broker = %self.identifier, route = %envelope.route, "child link failed");
            let node = self
                .children
                .get(&envelope.route)
                .and_then(|c| c.node_id)
                .map(GlobalId::for_node)
                .unwrap_or_default();
            return self.child_gone(envelope.route, node);
        }

        if envelope.route == RouteId::PARENT && !message.dest.is_valid() {
            // Structural error from above: fan out and keep draining
            // until the children disconnect.
            self.errored = true;
            return self.broadcast(message);
        }

        if self.addressed_to_me(&message) {
            self.errored = true;
            warn!(broker = %self.identifier, code = %message.name, "error received");
            return Vec::new();
        }
        self.route(Envelope {
            route: envelope.route,
            message,
        })
    }

    // ── Queries ──

    fn handle_query(&mut self, envelope: Envelope) -> Vec<Outbound> {
        let message = envelope.message;
        let target_is_me = message.name == self.identifier
            || message.name == "broker"
            || (message.name == "root" && self.is_root);
        if target_is_me {
            let query = String::from_utf8_lossy(&message.payload).to_string();
            let answer = self.answer_query(&query);
            let mut reply = ActionMessage::new(ActionCode::QueryReply)
                .with_dest(message.source)
                .with_payload(answer.into_bytes());
            reply.message_id = message.message_id;
            reply.source = self.my_id();
            return self.route_message(reply);
        }
        if message.name == "root" {
            return vec![Outbound::to_parent(message)];
        }
        if message.dest.is_valid() {
            return self.route(Envelope {
                route: envelope.route,
                message,
            });
        }
        if self.is_root {
            // Resolve the target by name: a federate or a child node.
            if let Some(id) = self.registry.federate_id(&message.name) {
                let forwarded = message.with_dest(id);
                return self.route_message(forwarded);
            }
            if let Some(node) = self
                .children
                .values()
                .find(|c| c.name == message.name)
                .and_then(|c| c.node_id)
            {
                let forwarded = message.with_dest(GlobalId::for_node(node));
                return self.route_message(forwarded);
            }
            let mut reply = ActionMessage::new(ActionCode::QueryReply)
                .with_dest(message.source)
                .with_payload(b"#invalid".to_vec());
            reply.message_id = message.message_id;
            reply.source = self.my_id();
            return self.route_message(reply);
        }
        vec![Outbound::to_parent(message)]
    }

    fn answer_query(&self, query: &str) -> String {
        match query {
            "name" => self.identifier.clone(),
            "state" => match (self.errored, self.phase) {
                (true, _) => "errored".into(),
                (_, BrokerPhase::Connecting) => "connecting".into(),
                (_, BrokerPhase::Operating) => "operating".into(),
                (_, BrokerPhase::Initializing) => "initializing".into(),
                (_, BrokerPhase::Executing) => "executing".into(),
            },
            "current_time" => format!("{}", self.subtree.min_granted().as_seconds()),
            "federates" => list(self.registry.federate_names()),
            "publications" => list(self.registry.publication_names()),
            "dependencies" => {
                let mut names: Vec<&str> = self
                    .children
                    .values()
                    .filter(|c| !c.disconnected)
                    .map(|c| c.name.as_str())
                    .collect();
                names.sort_unstable();
                list(names)
            }
            _ => "#invalid".into(),
        }
    }

    // ── Time aggregation ──

    fn handle_timing_report(&mut self, envelope: Envelope) -> Vec<Outbound> {
        let message = envelope.message;
        if !self.addressed_to_me(&message) {
            return self.route(Envelope {
                route: envelope.route,
                message,
            });
        }
        match message.action {
            ActionCode::TimeDependency => {
                match decode_payload::<TimingInfo>(&message.payload) {
                    Ok(info) => self.subtree.update(message.source, info),
                    Err(err) => {
                        warn!(broker = %self.identifier, %err, "malformed timing report");
                        return Vec::new();
                    }
                }
            }
            ActionCode::TimeGrant => {
                self.subtree.update_grant(message.source, message.time);
            }
            _ => return Vec::new(),
        }
        if self.is_root {
            return Vec::new();
        }
        match self.subtree.changed_aggregate() {
            Some(aggregate) => {
                let payload = encode_payload(&aggregate).unwrap_or_default();
                let report = self.stamp(
                    ActionMessage::new(ActionCode::TimeDependency)
                        .with_time(aggregate.time_next)
                        .with_payload(payload),
                );
                vec![Outbound::to_parent(report)]
            }
            None => Vec::new(),
        }
    }

    fn handle_tick(&mut self) -> Vec<Outbound> {
        trace!(broker = %self.identifier, phase = ?self.phase, "tick");
        if self.now < self.options.node.timeout {
            return Vec::new();
        }
        if !self.is_root {
            if self.node_id.is_none() {
                warn!(broker = %self.identifier, "no broker connection within timeout");
                self.errored = true;
                self.finished = true;
            }
            return Vec::new();
        }
        if !self.init_granted {
            // The required federates/children never arrived.
            warn!(broker = %self.identifier, "initialization timed out");
            self.errored = true;
            let err = FederationError::InitTimeout;
            let mut error = ActionMessage::new(ActionCode::Error)
                .with_name(err.code())
                .with_payload(err.detail().into_bytes());
            error.set_flag(FLAG_ERROR);
            let error = self.stamp(error);
            let mut outbound = self.broadcast(error);
            let notice = self.stamp(ActionMessage::new(ActionCode::Disconnect));
            outbound.extend(self.broadcast(notice));
            self.finished = true;
            return outbound;
        }
        Vec::new()
    }
}

impl MessageProcessor for BrokerState {
    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn process_priority_command(
        &mut self,
        envelope: Envelope,
    ) -> Result<Vec<Outbound>, FederationError> {
        trace!(broker = %self.identifier, msg = %envelope.message, route = %envelope.route, "priority command");
        let outbound = match envelope.message.action {
            ActionCode::RegisterBroker | ActionCode::RegisterCore => {
                self.handle_child_registration(envelope)
            }
            ActionCode::ConnectionAck => self.handle_connection_ack(envelope),
            ActionCode::RegisterFederate => self.handle_register_federate(envelope),
            ActionCode::RegisterPublication | ActionCode::RegisterInput => {
                self.handle_register_handle(envelope)
            }
            ActionCode::AddSourceTarget => self.handle_add_source_target(envelope),
            ActionCode::FederateAck | ActionCode::RegistrationAck => self.route(envelope),
            ActionCode::AddSubscriber
            | ActionCode::SourceResolved
            | ActionCode::AddDependency
            | ActionCode::AddDependent => self.route(envelope),
            ActionCode::InitRequest => self.handle_init_request(envelope),
            ActionCode::InitGrant => self.handle_init_grant(envelope),
            ActionCode::ExecRequest => self.handle_exec_request(envelope),
            ActionCode::ExecGrant => self.handle_exec_grant(envelope),
            ActionCode::Disconnect => self.handle_disconnect(envelope),
            ActionCode::Error => self.handle_error(envelope),
            ActionCode::Query => self.handle_query(envelope),
            ActionCode::QueryReply => self.route(envelope),
            other => {
                warn!(broker = %self.identifier, action = other.name(), "unexpected priority command");
                Vec::new()
            }
        };
        Ok(outbound)
    }

    fn process_command(&mut self, envelope: Envelope) -> Result<Vec<Outbound>, FederationError> {
        let outbound = match envelope.message.action {
            ActionCode::Tick => self.handle_tick(),
            ActionCode::TimeDependency | ActionCode::TimeGrant => {
                self.handle_timing_report(envelope)
            }
            ActionCode::TimeRequest if self.addressed_to_me(&envelope.message) => {
                // Subtree demand reports are informational at brokers.
                Vec::new()
            }
            _ if envelope.message.dest.is_valid() => self.route(envelope),
            other => {
                trace!(broker = %self.identifier, action = other.name(), "dropping undirected command");
                Vec::new()
            }
        };
        Ok(outbound)
    }

    fn process_disconnect(&mut self) -> Vec<Outbound> {
        if self.finished {
            return Vec::new();
        }
        info!(broker = %self.identifier, "disconnecting");
        let notice = self.stamp(ActionMessage::new(ActionCode::Disconnect));
        let mut outbound = self.broadcast(notice.clone());
        if !self.is_root && self.node_id.is_some() {
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

fn list(names: Vec<&str>) -> String {
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
