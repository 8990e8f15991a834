//! Transport and delivery traits.

use tandem_protocol::ActionMessage;
use tandem_types::RouteId;
use thiserror::Error;

/// Error returned when an outbound send fails.
///
/// A failed send marks the link down: the node treats it like a
/// disconnect of whatever sat behind the route and propagates from
/// there.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("no link for route {0}")]
    UnknownRoute(RouteId),

    #[error("link {0} is down: {1}")]
    LinkDown(RouteId, String),

    #[error("transport is shut down")]
    Shutdown,
}

/// Outbound half of a node's connectivity.
///
/// `send` hands encoded bytes to the link behind `route` and must not
/// block on the consumer; backends own their buffering. Route 0 is the
/// parent link by convention, children get the ids assigned when they
/// attached.
pub trait Transport: Send + Sync {
    fn send(&self, route: RouteId, data: &[u8]) -> Result<(), TransportError>;
}

/// Inbound half: decoded messages are delivered here, tagged with the
/// arrival route.
///
/// Implementations are expected to be lightweight (push into the node's
/// command queue); they are called from the transport's delivery thread.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, route: RouteId, message: ActionMessage);
}
