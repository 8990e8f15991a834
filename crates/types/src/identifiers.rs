//! Identifier newtypes for federation entities.

use sbor::prelude::BasicSbor;
use std::fmt;

/// Identifies one node (broker or core) in the federation tree.
///
/// Assigned by the root broker at registration time; the root itself is
/// node 1 and zero is never issued.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor,
)]
pub struct NodeId(pub u16);

impl NodeId {
    /// The root broker's own node id.
    pub const ROOT: NodeId = NodeId(1);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Globally unique id for any addressable entity: a node, a federate, or
/// an interface handle.
///
/// Partitioned 32-bit value: the high 16 bits are the owning [`NodeId`],
/// the low 16 bits a local index within that node. Local index 0 names
/// the node itself. Zero overall is reserved as "no id".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor,
)]
pub struct GlobalId(pub u32);

impl GlobalId {
    /// Reserved "no id" value.
    pub const INVALID: GlobalId = GlobalId(0);

    pub fn new(node: NodeId, local: u16) -> Self {
        GlobalId(((node.0 as u32) << 16) | local as u32)
    }

    /// The id naming a node itself (local part zero).
    pub fn for_node(node: NodeId) -> Self {
        Self::new(node, 0)
    }

    pub fn node(self) -> NodeId {
        NodeId((self.0 >> 16) as u16)
    }

    pub fn local(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// True when this id names a node rather than a federate or handle.
    pub fn is_node(self) -> bool {
        self.is_valid() && self.local() == 0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node(), self.local())
    }
}

/// Identifies one outbound link from a node.
///
/// Route 0 is always the parent link; children are assigned increasing
/// ids as they attach. [`RouteId::LOCAL`] marks messages that originated
/// on the node itself (API calls, timers) and must never be sent out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct RouteId(pub u32);

impl RouteId {
    /// The upstream (parent) link.
    pub const PARENT: RouteId = RouteId(0);

    /// Sentinel for node-local origin: API facade, timer, self-routed.
    pub const LOCAL: RouteId = RouteId(u32::MAX);

    pub fn is_local(self) -> bool {
        self == Self::LOCAL
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "local")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}
