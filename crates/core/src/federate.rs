//! Blocking federate-facing API.
//!
//! Every call posts a command into the core's queue and parks on a
//! single-shot reply channel; the core's worker completes the entry when
//! the answer is ready, which may involve a round trip to the root
//! broker. One outstanding time request per federate falls out of the
//! blocking shape.

use crate::{ApiReply, CoreOptions, CoreState, PendingCalls};
use std::sync::Arc;
use std::time::Duration;
use tandem_coordination::TimingConfig;
use tandem_network::Transport;
use tandem_protocol::{
    encode_payload, ActionCode, ActionMessage, HandleRegistration, OptionUpdate, FLAG_GLOBAL,
    FLAG_ITERATE,
};
use tandem_runtime::{command_queue, spawn_node, CommandReceiver, CommandSender, NodeHandle};
use tandem_types::{
    FederationError, GlobalId, HandleFlags, HandleKind, HandleOption, SimTime,
};

/// Outcome of a time request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeResult {
    pub granted: SimTime,
    /// The grant was forced out by the iteration limit.
    pub iteration_limit: bool,
}

struct CoreShared {
    sender: CommandSender,
    pending: Arc<PendingCalls>,
    call_timeout: Duration,
}

impl CoreShared {
    fn call(&self, build: impl FnOnce(u32) -> ActionMessage) -> Result<ApiReply, FederationError> {
        let (id, rx) = self.pending.register();
        if !self.sender.push_local(build(id)) {
            self.pending.forget(id);
            return Err(FederationError::Disconnected);
        }
        match rx.recv_timeout(self.call_timeout) {
            Ok(ApiReply::Failed(err)) => Err(err),
            Ok(reply) => Ok(reply),
            Err(_) => {
                self.pending.forget(id);
                Err(FederationError::Disconnected)
            }
        }
    }
}

/// A running core node plus its connection facade.
pub struct Core {
    handle: NodeHandle,
    shared: Arc<CoreShared>,
    identifier: String,
}

impl Core {
    /// Create the core's queue ahead of spawning, so the inbound sink
    /// can be registered with a transport fabric first.
    pub fn queue() -> (CommandSender, CommandReceiver) {
        command_queue()
    }

    /// Spawn the core worker.
    pub fn spawn(
        mut options: CoreOptions,
        sender: CommandSender,
        receiver: CommandReceiver,
        transport: Arc<dyn Transport>,
    ) -> Core {
        options.node.identifier_or_generate();
        let identifier = options.node.identifier.clone();
        let pending = Arc::new(PendingCalls::new());
        let call_timeout = options.call_timeout;
        let state = CoreState::new(options.clone(), Arc::clone(&pending));
        let handle = spawn_node(options.node, state, sender.clone(), receiver, transport);
        Core {
            handle,
            shared: Arc::new(CoreShared {
                sender,
                pending,
                call_timeout,
            }),
            identifier,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Register with the parent broker; blocks until the root has
    /// assigned this core its node id.
    pub fn connect(&self) -> Result<(), FederationError> {
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::RegisterCore);
            msg.message_id = id;
            msg
        })?;
        Ok(())
    }

    /// Join a federate to this core; valid before initialization only.
    pub fn join_federate(
        &self,
        name: &str,
        timing: TimingConfig,
    ) -> Result<Federate, FederationError> {
        let payload = encode_payload(&timing)
            .map_err(|e| FederationError::Internal(e.to_string()))?;
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::RegisterFederate)
                .with_name(name)
                .with_payload(payload.clone());
            msg.message_id = id;
            msg
        })?;
        match reply {
            ApiReply::Handle(id) => Ok(Federate {
                shared: Arc::clone(&self.shared),
                id,
                name: name.to_string(),
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Orderly shutdown of the core node.
    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn terminate(&self) {
        self.handle.terminate();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) {
        self.handle.join();
    }
}

/// One federate's view of its core.
///
/// Cheap to clone into the federate's own thread; all methods block on
/// the core's reply.
#[derive(Clone)]
pub struct Federate {
    shared: Arc<CoreShared>,
    id: GlobalId,
    name: String,
}

impl Federate {
    pub fn id(&self) -> GlobalId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn register(
        &self,
        action: ActionCode,
        key: &str,
        kind: HandleKind,
        type_tag: &str,
        units: &str,
        flags: HandleFlags,
        global: bool,
    ) -> Result<GlobalId, FederationError> {
        let payload = encode_payload(&HandleRegistration {
            kind,
            type_tag: type_tag.to_string(),
            units: units.to_string(),
            flags,
        })
        .map_err(|e| FederationError::Internal(e.to_string()))?;
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(action)
                .with_source(self.id)
                .with_name(key)
                .with_payload(payload.clone());
            msg.message_id = id;
            if global {
                msg.set_flag(FLAG_GLOBAL);
            }
            msg
        })?;
        match reply {
            ApiReply::Handle(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    /// Register a federate-scoped publication. Valid in `Created` only.
    pub fn register_publication(
        &self,
        key: &str,
        type_tag: &str,
        units: &str,
        flags: HandleFlags,
    ) -> Result<GlobalId, FederationError> {
        self.register(
            ActionCode::RegisterPublication,
            key,
            HandleKind::Publication,
            type_tag,
            units,
            flags,
            false,
        )
    }

    /// Register a publication under its key verbatim, federation-wide.
    pub fn register_global_publication(
        &self,
        key: &str,
        type_tag: &str,
        units: &str,
        flags: HandleFlags,
    ) -> Result<GlobalId, FederationError> {
        self.register(
            ActionCode::RegisterPublication,
            key,
            HandleKind::Publication,
            type_tag,
            units,
            flags,
            true,
        )
    }

    /// Register a federate-scoped input. Valid in `Created` only.
    pub fn register_input(
        &self,
        key: &str,
        type_tag: &str,
        units: &str,
        flags: HandleFlags,
    ) -> Result<GlobalId, FederationError> {
        self.register(
            ActionCode::RegisterInput,
            key,
            HandleKind::Input,
            type_tag,
            units,
            flags,
            false,
        )
    }

    pub fn register_global_input(
        &self,
        key: &str,
        type_tag: &str,
        units: &str,
        flags: HandleFlags,
    ) -> Result<GlobalId, FederationError> {
        self.register(
            ActionCode::RegisterInput,
            key,
            HandleKind::Input,
            type_tag,
            units,
            flags,
            true,
        )
    }

    /// Register an anonymous input bound by name to a publication; the
    /// binding resolves at the end of initialization.
    pub fn register_subscription(
        &self,
        target: &str,
        units: &str,
    ) -> Result<GlobalId, FederationError> {
        self.register_subscription_with_flags(target, units, HandleFlags::default())
    }

    pub fn register_subscription_with_flags(
        &self,
        target: &str,
        units: &str,
        flags: HandleFlags,
    ) -> Result<GlobalId, FederationError> {
        let key = format!("_input_{}", self.shared.pending.allocate_id());
        let input = self.register(
            ActionCode::RegisterInput,
            &key,
            HandleKind::Input,
            "",
            units,
            flags,
            false,
        )?;
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::AddSourceTarget)
                .with_source(input)
                .with_dest(self.id)
                .with_name(target);
            msg.message_id = id;
            msg
        })?;
        Ok(input)
    }

    /// The value returned by reads before any publish arrives.
    pub fn set_default_value(&self, input: GlobalId, data: Vec<u8>) -> Result<(), FederationError> {
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::SetDefault)
                .with_source(self.id)
                .with_dest(input)
                .with_payload(data.clone());
            msg.message_id = id;
            msg
        })?;
        Ok(())
    }

    pub fn set_handle_option(
        &self,
        handle: GlobalId,
        option: HandleOption,
        value: bool,
    ) -> Result<(), FederationError> {
        let payload = encode_payload(&OptionUpdate { option, value })
            .map_err(|e| FederationError::Internal(e.to_string()))?;
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::SetHandleOption)
                .with_source(self.id)
                .with_dest(handle)
                .with_payload(payload.clone());
            msg.message_id = id;
            msg
        })?;
        Ok(())
    }

    pub fn get_handle_option(
        &self,
        handle: GlobalId,
        option: HandleOption,
    ) -> Result<bool, FederationError> {
        let payload = encode_payload(&OptionUpdate {
            option,
            value: false,
        })
        .map_err(|e| FederationError::Internal(e.to_string()))?;
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::GetHandleOption)
                .with_source(self.id)
                .with_dest(handle)
                .with_payload(payload.clone());
            msg.message_id = id;
            msg
        })?;
        match reply {
            ApiReply::Flag(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Publish a payload, stamped with this federate's granted time.
    /// Valid in `Executing` only.
    pub fn publish(&self, publication: GlobalId, data: Vec<u8>) -> Result<(), FederationError> {
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::Publish)
                .with_source(self.id)
                .with_dest(publication)
                .with_payload(data.clone());
            msg.message_id = id;
            msg
        })?;
        Ok(())
    }

    /// Read an input's raw payload, marking the update consumed.
    pub fn get_value_raw(&self, input: GlobalId) -> Result<Vec<u8>, FederationError> {
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::ReadValue)
                .with_source(self.id)
                .with_dest(input);
            msg.message_id = id;
            msg
        })?;
        match reply {
            ApiReply::Value(data) => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    pub fn is_updated(&self, input: GlobalId) -> Result<bool, FederationError> {
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::CheckUpdate)
                .with_source(self.id)
                .with_dest(input);
            msg.message_id = id;
            msg
        })?;
        match reply {
            ApiReply::Flag(updated) => Ok(updated),
            other => Err(unexpected(other)),
        }
    }

    pub fn last_update_time(&self, input: GlobalId) -> Result<SimTime, FederationError> {
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::LastUpdateTime)
                .with_source(self.id)
                .with_dest(input);
            msg.message_id = id;
            msg
        })?;
        match reply {
            ApiReply::TimeValue(time) => Ok(time),
            other => Err(unexpected(other)),
        }
    }

    /// Inputs with unconsumed updates, for read-all loops.
    pub fn query_updates(&self) -> Result<Vec<GlobalId>, FederationError> {
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::QueryUpdates).with_source(self.id);
            msg.message_id = id;
            msg
        })?;
        match reply {
            ApiReply::Updates(ids) => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    /// Block at the federation-wide initialization barrier.
    pub fn enter_initializing(&self) -> Result<(), FederationError> {
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::InitRequest).with_source(self.id);
            msg.message_id = id;
            msg
        })?;
        Ok(())
    }

    /// Block at the execution barrier; on return the federate is at
    /// time zero.
    pub fn enter_executing(&self) -> Result<(), FederationError> {
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::ExecRequest).with_source(self.id);
            msg.message_id = id;
            msg
        })?;
        Ok(())
    }

    /// Request advancement of this federate's logical clock; blocks
    /// until granted. The grant may be earlier than requested when a
    /// pending value event pulls it in.
    pub fn request_time(
        &self,
        time: SimTime,
        iterate: bool,
    ) -> Result<TimeResult, FederationError> {
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::TimeRequest)
                .with_source(self.id)
                .with_time(time);
            msg.message_id = id;
            if iterate {
                msg.set_flag(FLAG_ITERATE);
            }
            msg
        })?;
        match reply {
            ApiReply::Time {
                granted,
                iteration_limit,
            } => Ok(TimeResult {
                granted,
                iteration_limit,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Synchronous query against a named target (`root`, `broker`,
    /// `core`, or a federate name).
    pub fn query(&self, target: &str, query: &str) -> Result<String, FederationError> {
        let reply = self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::Query)
                .with_source(self.id)
                .with_name(target)
                .with_payload(query.as_bytes().to_vec());
            msg.message_id = id;
            msg
        })?;
        match reply {
            ApiReply::Query(answer) => Ok(answer),
            other => Err(unexpected(other)),
        }
    }

    /// Leave the federation; peers blocked on this federate unblock.
    pub fn finalize(&self) -> Result<(), FederationError> {
        self.shared.call(|id| {
            let mut msg = ActionMessage::new(ActionCode::FinalizeFederate).with_source(self.id);
            msg.message_id = id;
            msg
        })?;
        Ok(())
    }
}

fn unexpected(reply: ApiReply) -> FederationError {
    FederationError::Internal(format!("unexpected reply: {reply:?}"))
}
