//! The seam between the actor loop and node state machines.

use crate::Envelope;
use std::time::Duration;
use tandem_protocol::ActionMessage;
use tandem_types::{FederationError, RouteId};

/// A message to route out of the node.
///
/// `RouteId::LOCAL` re-enqueues into the node's own queue; anything else
/// goes through the transport.
#[derive(Debug)]
pub struct Outbound {
    pub route: RouteId,
    pub message: ActionMessage,
}

impl Outbound {
    pub fn new(route: RouteId, message: ActionMessage) -> Self {
        Outbound { route, message }
    }

    pub fn to_parent(message: ActionMessage) -> Self {
        Outbound {
            route: RouteId::PARENT,
            message,
        }
    }
}

/// A node state machine driven by the actor loop.
///
/// Handlers run to completion without blocking; in particular they must
/// never touch the command queue they are fed from. All I/O is expressed
/// through the returned [`Outbound`] messages. An `Err` from a handler
/// is caught at the loop boundary: logged at full severity, then the
/// node transitions to disconnect.
pub trait MessageProcessor: Send {
    /// Wall-clock time since the node started, set before every step.
    fn set_time(&mut self, now: Duration);

    /// Handle a priority-band command.
    fn process_priority_command(
        &mut self,
        envelope: Envelope,
    ) -> Result<Vec<Outbound>, FederationError>;

    /// Handle a regular command (including `Tick`).
    fn process_command(&mut self, envelope: Envelope) -> Result<Vec<Outbound>, FederationError>;

    /// Run the disconnect handshake; called on `Stop` and on handler
    /// errors.
    fn process_disconnect(&mut self) -> Vec<Outbound>;

    /// When set, regular commands are no longer dispatched.
    fn halted(&self) -> bool;

    /// When set, the node has disconnected cleanly and the loop exits.
    fn finished(&self) -> bool;
}
