//! The per-node tick timer.

use crate::CommandSender;
use crossbeam::channel;
use std::thread::JoinHandle;
use std::time::Duration;
use tandem_protocol::{ActionCode, ActionMessage};
use tracing::trace;

/// Posts a periodic `Tick` heartbeat into the node's own queue.
///
/// The timer thread touches no node state; the tick command travels
/// through the queue like everything else. Cancelling joins the thread.
pub struct TickTimer {
    shutdown: channel::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl TickTimer {
    /// Spawn the timer. A zero period disables ticking entirely and
    /// returns an inert timer.
    pub fn spawn(name: &str, sender: CommandSender, period: Duration) -> TickTimer {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        if period.is_zero() {
            return TickTimer {
                shutdown: shutdown_tx,
                handle: None,
            };
        }
        let thread_name = format!("{name}-tick");
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let ticker = channel::tick(period);
                loop {
                    crossbeam::channel::select! {
                        recv(ticker) -> _ => {
                            sender.push_local(ActionMessage::new(ActionCode::Tick));
                        }
                        recv(shutdown_rx) -> _ => {
                            trace!("tick timer cancelled");
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn tick timer thread");
        TickTimer {
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stop ticking and join the timer thread.
    pub fn cancel(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_queue;

    #[test]
    fn test_ticks_arrive() {
        let (tx, rx) = command_queue();
        let mut timer = TickTimer::spawn("test", tx, Duration::from_millis(5));
        let envelope = rx.pop();
        assert_eq!(envelope.message.action, ActionCode::Tick);
        timer.cancel();
    }

    #[test]
    fn test_zero_period_is_inert() {
        let (tx, rx) = command_queue();
        let mut timer = TickTimer::spawn("test", tx.clone(), Duration::ZERO);
        tx.push_local(ActionMessage::new(ActionCode::Stop));
        assert_eq!(rx.pop().message.action, ActionCode::Stop);
        timer.cancel();
    }
}
