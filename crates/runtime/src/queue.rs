//! The dual-priority command queue.

use crossbeam::channel::{self, Receiver, Sender};
use tandem_network::MessageSink;
use tandem_protocol::{ActionCode, ActionMessage};
use tandem_types::RouteId;
use tracing::trace;

/// A command plus the link it arrived on.
///
/// [`RouteId::LOCAL`] marks node-local origin: the API facade, the tick
/// timer, or a self-routed message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub route: RouteId,
    pub message: ActionMessage,
}

impl Envelope {
    pub fn local(message: ActionMessage) -> Self {
        Envelope {
            route: RouteId::LOCAL,
            message,
        }
    }
}

/// Producer half. Cloned freely across transports, timers and facades.
#[derive(Clone)]
pub struct CommandSender {
    priority: Sender<Envelope>,
    regular: Sender<Envelope>,
}

/// Consumer half, owned by the node's worker thread.
pub struct CommandReceiver {
    priority: Receiver<Envelope>,
    regular: Receiver<Envelope>,
}

/// Create the queue for one node.
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    let (priority_tx, priority_rx) = channel::unbounded();
    let (regular_tx, regular_rx) = channel::unbounded();
    (
        CommandSender {
            priority: priority_tx,
            regular: regular_tx,
        },
        CommandReceiver {
            priority: priority_rx,
            regular: regular_rx,
        },
    )
}

impl CommandSender {
    /// Enqueue, classifying into the priority band by action code.
    /// Returns false when the consumer has exited and the command was
    /// dropped.
    pub fn push(&self, envelope: Envelope) -> bool {
        let result = if envelope.message.action.is_priority() {
            self.priority.send(envelope)
        } else {
            self.regular.send(envelope)
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                trace!(msg = %err.into_inner().message, "dropping command for exited node");
                false
            }
        }
    }

    /// Enqueue a node-local command.
    pub fn push_local(&self, message: ActionMessage) -> bool {
        self.push(Envelope::local(message))
    }
}

impl MessageSink for CommandSender {
    fn deliver(&self, route: RouteId, message: ActionMessage) {
        self.push(Envelope { route, message });
    }
}

impl CommandReceiver {
    /// Block until a command is available; the priority band is drained
    /// before any regular command, strict FIFO within each band.
    ///
    /// If every producer is gone the queue can never fill again; a
    /// terminate command is synthesized so the loop shuts down instead
    /// of blocking forever. Both bands share the [`CommandSender`]
    /// clones, so they always close together.
    pub fn pop(&self) -> Envelope {
        loop {
            let priority_closed = match self.priority.try_recv() {
                Ok(envelope) => return envelope,
                Err(channel::TryRecvError::Empty) => false,
                Err(channel::TryRecvError::Disconnected) => true,
            };
            // Priority band is empty; take regular traffic if present.
            match self.regular.try_recv() {
                Ok(envelope) => return envelope,
                Err(channel::TryRecvError::Empty) => {}
                Err(channel::TryRecvError::Disconnected) => {
                    if priority_closed {
                        return Envelope::local(ActionMessage::new(
                            ActionCode::TerminateImmediately,
                        ));
                    }
                }
            }
            crossbeam::channel::select! {
                recv(self.priority) -> envelope => {
                    if let Ok(envelope) = envelope {
                        return envelope;
                    }
                }
                recv(self.regular) -> envelope => {
                    if let Ok(envelope) = envelope {
                        return envelope;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(action: ActionCode) -> ActionMessage {
        ActionMessage::new(action)
    }

    #[test]
    fn test_priority_drains_first() {
        let (tx, rx) = command_queue();
        tx.push_local(msg(ActionCode::Publish));
        tx.push_local(msg(ActionCode::TimeRequest));
        tx.push_local(msg(ActionCode::RegisterFederate));

        assert_eq!(rx.pop().message.action, ActionCode::RegisterFederate);
        assert_eq!(rx.pop().message.action, ActionCode::Publish);
        assert_eq!(rx.pop().message.action, ActionCode::TimeRequest);
    }

    #[test]
    fn test_fifo_within_band() {
        let (tx, rx) = command_queue();
        for counter in 0..10u16 {
            let mut m = msg(ActionCode::Publish);
            m.counter = counter;
            tx.push_local(m);
        }
        for counter in 0..10u16 {
            assert_eq!(rx.pop().message.counter, counter);
        }
    }

    #[test]
    fn test_route_is_preserved() {
        let (tx, rx) = command_queue();
        tx.deliver(RouteId(3), msg(ActionCode::Publish));
        let envelope = rx.pop();
        assert_eq!(envelope.route, RouteId(3));
    }

    #[test]
    fn test_disconnected_producers_terminate() {
        let (tx, rx) = command_queue();
        drop(tx);
        assert_eq!(rx.pop().message.action, ActionCode::TerminateImmediately);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let (tx, rx) = command_queue();
        let handle = std::thread::spawn(move || rx.pop().message.action);
        std::thread::sleep(std::time::Duration::from_millis(20));
        tx.push_local(msg(ActionCode::Stop));
        assert_eq!(handle.join().expect("join"), ActionCode::Stop);
    }
}
