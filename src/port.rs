//! Entangled message ports between a processor and its host-side node.
//!
//! Every constructed processor receives one end of a [`message_channel`]; the
//! host keeps the other. Messages are arbitrary JSON values and travel through
//! bounded lock-free SPSC queues, one per direction.

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(0);

/// Default capacity of each direction of a port.
pub const PORT_QUEUE_CAPACITY: usize = 64;

/// Errors posting on a [`MessagePort`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("port queue full, message dropped")]
    Full(Value),
}

/// One end of a bidirectional message channel.
pub struct MessagePort {
    /// Shared by both ends of one channel, unique across channels.
    channel: u64,
    tx: Producer<Value>,
    rx: Consumer<Value>,
}

impl std::fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePort")
            .field("channel", &self.channel)
            .field("pending", &self.rx.slots())
            .finish()
    }
}

/// Create an entangled pair of ports, each direction holding `capacity` messages.
pub fn message_channel(capacity: usize) -> (MessagePort, MessagePort) {
    let (a_tx, b_rx) = RingBuffer::new(capacity);
    let (b_tx, a_rx) = RingBuffer::new(capacity);
    let channel = NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed);
    (
        MessagePort {
            channel,
            tx: a_tx,
            rx: a_rx,
        },
        MessagePort {
            channel,
            tx: b_tx,
            rx: b_rx,
        },
    )
}

impl MessagePort {
    /// Post a message to the other end. Never blocks.
    pub fn post_message(&mut self, message: impl Into<Value>) -> Result<(), PortError> {
        self.tx.push(message.into()).map_err(|PushError::Full(v)| PortError::Full(v))
    }

    /// Take the next message from the other end, if any.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.pop().ok()
    }

    /// Take every pending message.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.rx.slots());
        while let Ok(msg) = self.rx.pop() {
            out.push(msg);
        }
        out
    }

    /// Identity of the channel this port belongs to.
    pub fn channel_id(&self) -> u64 {
        self.channel
    }

    /// False once the other end has been dropped.
    pub fn is_entangled(&self) -> bool {
        !self.tx.is_abandoned()
    }
}
