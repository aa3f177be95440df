//! Bounded handoff of bus messages to the control loop.
//!
//! The bus client runs on its own thread (or tokio task) and must never
//! block on the control loop. [`IngressSender::submit`] copies the message
//! into an owned [`MqttMessage`] and tries to enqueue it; when the queue is
//! full the message is dropped and counted.
//!
//! ```rust
//! use rs_trainz_ble::ingress::command_queue;
//!
//! let (tx, rx) = command_queue(2);
//! assert!(tx.submit("trains/command", b"a"));
//! assert!(tx.submit("trains/command", b"b"));
//! assert!(!tx.submit("trains/command", b"c"));
//!
//! let drained = rx.drain();
//! assert_eq!(drained.len(), 2);
//! assert_eq!(rx.dropped(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;

use tracing::warn;

use crate::traits::MqttMessage;

/// Create a command queue holding up to `capacity` messages.
///
/// A capacity of zero is raised to one.
pub fn command_queue(capacity: usize) -> (IngressSender, IngressReceiver) {
    let (tx, rx) = sync_channel(capacity.max(1));
    let dropped = Arc::new(AtomicUsize::new(0));
    (
        IngressSender {
            tx,
            dropped: dropped.clone(),
        },
        IngressReceiver { rx, dropped },
    )
}

/// Producer side. Cheap to clone; one per bus client.
#[derive(Clone, Debug)]
pub struct IngressSender {
    tx: SyncSender<MqttMessage>,
    dropped: Arc<AtomicUsize>,
}

impl IngressSender {
    /// Enqueue a copy of the message without blocking.
    ///
    /// Returns false if the message was dropped because the queue is full
    /// or the control loop is gone.
    pub fn submit(&self, topic: &str, payload: &[u8]) -> bool {
        self.submit_message(MqttMessage::new(topic, payload))
    }

    /// Enqueue an already owned message without blocking.
    pub fn submit_message(&self, message: MqttMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(topic = %message.topic, dropped = total, "command queue full, message dropped");
                false
            }
            Err(TrySendError::Disconnected(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %message.topic, "control loop gone, message dropped");
                false
            }
        }
    }

    /// Messages dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side, owned by the control loop.
#[derive(Debug)]
pub struct IngressReceiver {
    rx: Receiver<MqttMessage>,
    dropped: Arc<AtomicUsize>,
}

impl IngressReceiver {
    /// Take the oldest queued message, if any.
    pub fn try_next(&self) -> Option<MqttMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Take every message queued right now, oldest first.
    pub fn drain(&self) -> Vec<MqttMessage> {
        self.rx.try_iter().collect()
    }

    /// Messages dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
