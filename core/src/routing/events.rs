// Router → presentation layer notifications

use crate::message::MessageEnvelope;
use crate::store::PeerRecord;
use tokio::sync::mpsc;
use tracing::debug;

/// Events emitted by the router to the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A message was accepted and stored (local or from the radio)
    NewMessage(MessageEnvelope),
    /// The known peer list changed; carries the full list
    PeersChanged(Vec<PeerRecord>),
}

/// Sending half of the event channel, fixed at router construction so
/// there is no window where events go nowhere by accident.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RouterEvent>,
}

impl EventSink {
    /// Create a sink together with its receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: RouterEvent) {
        if self.tx.send(event).is_err() {
            debug!("Router event dropped: no listener");
        }
    }
}
