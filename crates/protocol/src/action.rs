//! Action codes carried by every message.

use sbor::prelude::BasicSbor;

/// The command a message carries.
///
/// A subset is flagged *priority* (registration, lifecycle barriers,
/// disconnection, errors, queries) and is drained before any regular
/// command; see [`ActionCode::is_priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum ActionCode {
    // ── Loop control ──
    /// Drop silently.
    Ignore,
    /// Periodic heartbeat posted by the node's own timer.
    Tick,
    /// Orderly shutdown: process, then run the disconnect handshake.
    Stop,
    /// Abandon the loop without a handshake.
    TerminateImmediately,

    // ── Connection & registration (priority) ──
    /// A broker asks its parent to join the tree.
    RegisterBroker,
    /// A core asks its parent broker to join the tree.
    RegisterCore,
    /// Root's answer to `RegisterBroker`/`RegisterCore`: assigns a node id.
    ConnectionAck,
    /// A federate joins its core; forwarded to the root name table.
    RegisterFederate,
    /// Root's answer to `RegisterFederate`.
    FederateAck,
    /// Register a publication handle; collision-checked at the root.
    RegisterPublication,
    /// Register an input handle; collision-checked at the root.
    RegisterInput,
    /// Request a by-name source binding for an input, resolved at the
    /// end of initialization.
    AddSourceTarget,
    /// Root's answer to a handle registration.
    RegistrationAck,

    // ── Lifecycle barriers (priority) ──
    /// A federate (or a whole subtree) is ready to initialize.
    InitRequest,
    /// Root broadcast: the federation enters initialization.
    InitGrant,
    /// A federate (or a whole subtree) is ready to execute.
    ExecRequest,
    /// Root broadcast: the federation enters execution at time zero.
    ExecGrant,

    // ── Time coordination ──
    /// A federate or subtree wants to advance its logical clock.
    TimeRequest,
    /// Advancement granted to the destination.
    TimeGrant,
    /// A peer reports its earliest next output and minimum dependent
    /// event; last-write-wins per source.
    TimeDependency,
    /// Edge installation is initialization-time configuration and rides
    /// the priority band; edge removal happens during execution and must
    /// stay ordered behind in-flight value traffic.
    AddDependency,
    RemoveDependency,
    AddDependent,
    RemoveDependent,

    // ── Value plane ──
    /// A payload published toward one destination input.
    Publish,
    /// Installs a destination input on a publication (root-resolved,
    /// priority: must land before the initialization grant).
    AddSubscriber,
    /// Installs the resolved source publication on an input (priority,
    /// as above).
    SourceResolved,

    // ── Federate API commands (node-local, never cross a link) ──
    SetDefault,
    ReadValue,
    CheckUpdate,
    LastUpdateTime,
    QueryUpdates,
    SetHandleOption,
    GetHandleOption,
    FinalizeFederate,

    // ── Disconnect & errors (priority) ──
    /// The source entity leaves the federation; its edges are removed.
    Disconnect,
    /// Something failed; `name` carries the stable error code.
    Error,

    // ── Queries (priority) ──
    Query,
    QueryReply,
}

impl ActionCode {
    /// Whether this command is drained ahead of regular traffic.
    pub fn is_priority(self) -> bool {
        use ActionCode::*;
        matches!(
            self,
            RegisterBroker
                | RegisterCore
                | ConnectionAck
                | RegisterFederate
                | FederateAck
                | RegisterPublication
                | RegisterInput
                | AddSourceTarget
                | RegistrationAck
                | AddSubscriber
                | SourceResolved
                | AddDependency
                | AddDependent
                | InitRequest
                | InitGrant
                | ExecRequest
                | ExecGrant
                | Disconnect
                | Error
                | Query
                | QueryReply
        )
    }

    /// Commands only ever posted by the node's own facade or timer.
    pub fn is_node_local(self) -> bool {
        use ActionCode::*;
        matches!(
            self,
            Ignore
                | Tick
                | Stop
                | TerminateImmediately
                | SetDefault
                | ReadValue
                | CheckUpdate
                | LastUpdateTime
                | QueryUpdates
                | SetHandleOption
                | GetHandleOption
                | FinalizeFederate
        )
    }

    /// Short name for traces and the dump log.
    pub fn name(self) -> &'static str {
        use ActionCode::*;
        match self {
            Ignore => "ignore",
            Tick => "tick",
            Stop => "stop",
            TerminateImmediately => "terminate",
            RegisterBroker => "reg-broker",
            RegisterCore => "reg-core",
            ConnectionAck => "conn-ack",
            RegisterFederate => "reg-fed",
            FederateAck => "fed-ack",
            RegisterPublication => "reg-pub",
            RegisterInput => "reg-input",
            AddSourceTarget => "add-source-target",
            RegistrationAck => "reg-ack",
            InitRequest => "init-request",
            InitGrant => "init-grant",
            ExecRequest => "exec-request",
            ExecGrant => "exec-grant",
            TimeRequest => "time-request",
            TimeGrant => "time-grant",
            TimeDependency => "time-dependency",
            AddDependency => "add-dependency",
            RemoveDependency => "remove-dependency",
            AddDependent => "add-dependent",
            RemoveDependent => "remove-dependent",
            Publish => "publish",
            AddSubscriber => "add-subscriber",
            SourceResolved => "source-resolved",
            SetDefault => "set-default",
            ReadValue => "read-value",
            CheckUpdate => "check-update",
            LastUpdateTime => "last-update-time",
            QueryUpdates => "query-updates",
            SetHandleOption => "set-option",
            GetHandleOption => "get-option",
            FinalizeFederate => "finalize",
            Disconnect => "disconnect",
            Error => "error",
            Query => "query",
            QueryReply => "query-reply",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_and_errors_are_priority() {
        assert!(ActionCode::RegisterCore.is_priority());
        assert!(ActionCode::Disconnect.is_priority());
        assert!(ActionCode::Error.is_priority());
        assert!(ActionCode::ExecRequest.is_priority());
    }

    #[test]
    fn test_time_and_value_traffic_is_regular() {
        assert!(!ActionCode::TimeRequest.is_priority());
        assert!(!ActionCode::TimeDependency.is_priority());
        assert!(!ActionCode::Publish.is_priority());
        assert!(!ActionCode::Tick.is_priority());
    }

    #[test]
    fn test_api_commands_are_node_local() {
        assert!(ActionCode::ReadValue.is_node_local());
        assert!(ActionCode::FinalizeFederate.is_node_local());
        assert!(!ActionCode::Publish.is_node_local());
    }
}
