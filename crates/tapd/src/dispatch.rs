//! Routes session events to observers.
//!
//! Capture threads push events into an unbounded channel and return at
//! once; a single async task drains it and calls every observer with its
//! own copy of the packet.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tap_core::Direction;
use tap_services::{EventSink, Observer, SessionEvent};
use tokio::sync::{broadcast, mpsc};

/// Observers in registration order.
pub struct ObserverDispatcher {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverDispatcher {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        tracing::debug!(observer = observer.name(), "observer registered");
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver one event to every observer. Failures and panics are logged
    /// and do not stop delivery to the others.
    pub fn dispatch(&self, event: &SessionEvent) {
        for observer in &self.observers {
            let copy = private_copy(event);
            let result = catch_unwind(AssertUnwindSafe(|| match event.direction {
                Direction::Outbound => observer.packet_sent(copy),
                Direction::Inbound => observer.packet_received(copy),
            }));

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    observer = observer.name(),
                    session = event.session.id(),
                    direction = %event.direction,
                    error = %e,
                    "observer failed"
                ),
                Err(_) => tracing::error!(
                    observer = observer.name(),
                    session = event.session.id(),
                    direction = %event.direction,
                    "observer panicked"
                ),
            }
        }
    }

    /// Start the dispatch task. Returns the sink capture threads emit into.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> (ChannelSink, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx, shutdown));
        (ChannelSink { tx }, handle)
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("observer dispatch shutting down");
                    return;
                }
                event = rx.recv() => match event {
                    Some(event) => self.dispatch(&event),
                    None => return,
                },
            }
        }
    }
}

impl Default for ObserverDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound copies keep the cursor past the fingerprint; inbound copies
/// start at 0.
fn private_copy(event: &SessionEvent) -> SessionEvent {
    let keep_pos = event.direction == Direction::Outbound;
    SessionEvent {
        packet: event.packet.copy(keep_pos),
        ..event.clone()
    }
}

/// [`EventSink`] feeding an [`ObserverDispatcher`] task.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("observer dispatch stopped, event dropped");
        }
    }
}
