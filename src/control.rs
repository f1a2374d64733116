//! Control messages between the host and the worker scope.
//!
//! The host sends [`HostMessage`]s, the worker answers with [`WorkerMessage`]s.
//! Both directions travel over bounded lock-free SPSC queues created by
//! [`worklet_channel`]. Outbound messages are plain data and serialize to the
//! JSON shape the host expects:
//!
//! ```text
//! {"type":"load","url":"utils"}
//! {"type":"register","name":"gain","descriptor":[...]}
//! {"type":"state","node":7,"processor":0,"state":"running"}
//! ```

use crate::buffer::BusDescriptor;
use crate::port::MessagePort;
use crate::processor::ParameterDescriptor;
use crate::states::LifecycleState;
use crate::{HostNodeId, ProcessorId};
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capacity for each direction of the control channel.
pub const CONTROL_QUEUE_CAPACITY: usize = 256;

/// Host-provided options for a new processor.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub samples_per_buffer: usize,
    pub sample_rate: f32,
    pub bus: BusDescriptor,
    /// Passed through to the processor constructor untouched.
    pub processor_options: Value,
}

/// Arguments of a `createProcessor` request.
#[derive(Debug, Clone)]
pub struct CreateProcessorArgs {
    /// Registered processor name.
    pub name: String,
    /// Host-side graph node this processor belongs to.
    pub node: HostNodeId,
    pub options: NodeOptions,
}

/// Messages sent from the host to the worker.
#[derive(Debug)]
pub enum HostMessage {
    /// Load a module into the scope, running its registrations.
    Import { url: String },

    /// Instantiate a registered processor. `port` is the worker's end of the
    /// processor's message channel.
    CreateProcessor {
        args: CreateProcessorArgs,
        port: MessagePort,
    },

    /// Render one block from ping-pong slot `index`.
    Process { processor: ProcessorId, index: usize },

    /// Drop a processor, keeping its id retired.
    Dispose { processor: ProcessorId },
}

impl HostMessage {
    /// Returns a human-readable description (for debugging).
    pub fn description(&self) -> &'static str {
        match self {
            HostMessage::Import { .. } => "import",
            HostMessage::CreateProcessor { .. } => "createProcessor",
            HostMessage::Process { .. } => "process",
            HostMessage::Dispose { .. } => "dispose",
        }
    }
}

/// The inbound messages that are plain data, in their JSON form.
///
/// `createProcessor` is absent: it carries shared buffers and a port, which
/// have no wire representation.
///
/// ```text
/// {"type":"import","url":"utils"}
/// {"type":"process","processor":0,"index":1}
/// {"type":"dispose","processor":0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostRecord {
    Import { url: String },
    Process { processor: ProcessorId, index: usize },
    Dispose { processor: ProcessorId },
}

impl HostRecord {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<HostRecord> for HostMessage {
    fn from(record: HostRecord) -> Self {
        match record {
            HostRecord::Import { url } => HostMessage::Import { url },
            HostRecord::Process { processor, index } => HostMessage::Process { processor, index },
            HostRecord::Dispose { processor } => HostMessage::Dispose { processor },
        }
    }
}

impl HostMessage {
    /// The wire form of this message, if it has one.
    pub fn to_record(&self) -> Option<HostRecord> {
        match self {
            HostMessage::Import { url } => Some(HostRecord::Import { url: url.clone() }),
            HostMessage::CreateProcessor { .. } => None,
            HostMessage::Process { processor, index } => Some(HostRecord::Process {
                processor: *processor,
                index: *index,
            }),
            HostMessage::Dispose { processor } => Some(HostRecord::Dispose { processor: *processor }),
        }
    }
}

/// Messages sent from the worker to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// A module finished loading.
    Load { url: String },

    /// A processor name was registered for the first time.
    Register {
        name: String,
        descriptor: Vec<ParameterDescriptor>,
    },

    /// Lifecycle change of a node's processor. `processor` is absent until an
    /// id has been assigned.
    State {
        node: HostNodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processor: Option<ProcessorId>,
        state: LifecycleState,
    },
}

impl WorkerMessage {
    pub fn to_json(&self) -> Value {
        // Serializing plain data with string keys cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Where the scope posts outbound messages.
pub trait Outbox {
    fn post(&mut self, msg: WorkerMessage);
}

impl Outbox for Producer<WorkerMessage> {
    fn post(&mut self, msg: WorkerMessage) {
        if let Err(PushError::Full(msg)) = self.push(msg) {
            tracing::warn!(?msg, "outbound queue full, message dropped");
        }
    }
}

impl Outbox for Vec<WorkerMessage> {
    fn post(&mut self, msg: WorkerMessage) {
        self.push(msg);
    }
}

/// Where the scope reads inbound messages from.
pub trait MessageSource {
    fn pop(&mut self) -> Option<HostMessage>;
}

impl MessageSource for Consumer<HostMessage> {
    fn pop(&mut self) -> Option<HostMessage> {
        Consumer::pop(self).ok()
    }
}

impl MessageSource for std::collections::VecDeque<HostMessage> {
    fn pop(&mut self) -> Option<HostMessage> {
        self.pop_front()
    }
}

/// Errors sending on the control channel.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("control queue full, {} message not sent", .0.description())]
    QueueFull(HostMessage),
}

/// The host's end of the control channel.
pub struct HostEndpoint {
    tx: Producer<HostMessage>,
    rx: Consumer<WorkerMessage>,
}

/// The worker's end of the control channel.
pub struct WorkerEndpoint {
    pub inbound: Consumer<HostMessage>,
    pub outbound: Producer<WorkerMessage>,
}

/// Creates a new control channel, `capacity` messages per direction.
///
/// Returns (host end, worker end).
pub fn worklet_channel(capacity: usize) -> (HostEndpoint, WorkerEndpoint) {
    let (host_tx, worker_rx) = RingBuffer::new(capacity);
    let (worker_tx, host_rx) = RingBuffer::new(capacity);
    (
        HostEndpoint {
            tx: host_tx,
            rx: host_rx,
        },
        WorkerEndpoint {
            inbound: worker_rx,
            outbound: worker_tx,
        },
    )
}

impl HostEndpoint {
    pub fn send(&mut self, msg: HostMessage) -> Result<(), ControlError> {
        self.tx
            .push(msg)
            .map_err(|PushError::Full(msg)| ControlError::QueueFull(msg))
    }

    pub fn try_recv(&mut self) -> Option<WorkerMessage> {
        self.rx.pop().ok()
    }

    /// Take every pending worker message.
    pub fn drain(&mut self) -> Vec<WorkerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.pop() {
            out.push(msg);
        }
        out
    }
}
