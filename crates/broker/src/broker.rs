//! The broker facade: spawn a broker node and drive it from outside.

use crate::{BrokerOptions, BrokerState};
use std::sync::Arc;
use tandem_network::Transport;
use tandem_protocol::{ActionCode, ActionMessage};
use tandem_runtime::{command_queue, spawn_node, CommandSender, NodeHandle};

/// Position of a broker in the federation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerRole {
    /// Owns the name table and the federation barriers.
    Root,
    /// Forwards to a parent broker.
    Sub,
}

/// A running broker node.
///
/// The worker thread owns all broker state; this handle only enqueues.
pub struct Broker {
    handle: NodeHandle,
}

impl Broker {
    /// Create the broker's queue ahead of spawning, so the inbound sink
    /// can be registered with a transport fabric first.
    pub fn queue() -> (CommandSender, tandem_runtime::CommandReceiver) {
        command_queue()
    }

    /// Spawn the broker worker. Sub-brokers immediately introduce
    /// themselves upstream through `transport`.
    pub fn spawn(
        mut options: BrokerOptions,
        role: BrokerRole,
        sender: CommandSender,
        receiver: tandem_runtime::CommandReceiver,
        transport: Arc<dyn Transport>,
    ) -> Broker {
        options.node.identifier_or_generate();
        let state = BrokerState::new(options.clone(), role == BrokerRole::Root);
        if role == BrokerRole::Sub {
            sender.push_local(ActionMessage::new(ActionCode::RegisterBroker));
        }
        let handle = spawn_node(options.node, state, sender, receiver, transport);
        Broker { handle }
    }

    pub fn sender(&self) -> &CommandSender {
        self.handle.sender()
    }

    /// Orderly shutdown.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Abandon without the disconnect handshake.
    pub fn terminate(&self) {
        self.handle.terminate();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the broker's loop to exit.
    pub fn join(self) {
        self.handle.join();
    }
}
