//! Worker-side audio worklet runtime.
//!
//! Emulates the audio worklet threading model inside an ordinary worker
//! context. The host registers processor modules, asks the worker to build
//! processors over shared sample buffers, then drives them one block at a time
//! with `process` messages. Buffers are split into ping-pong slots so several
//! blocks can be in flight without copying.
//!
//! - [`registry`]: processor name → definition, write-once.
//! - [`buffer`]: shared sample storage and slot slicing.
//! - [`instance`]: append-only table of live processors.
//! - [`scope`]: the control-message handler tying them together.
//! - [`harness`]: an in-process host for tests, demos and offline renders.

pub mod buffer;
pub mod control;
pub mod error;
pub mod harness;
pub mod instance;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod layout;
pub mod port;
pub mod processor;
pub mod registry;
pub mod scope;
pub mod states;

use serde::{Deserialize, Serialize};

pub use buffer::{build_slices, BufferSlice, Bus, BusDescriptor, ChannelView, SampleBuffer, SliceError};
pub use control::{
    worklet_channel, CreateProcessorArgs, HostEndpoint, HostMessage, HostRecord, NodeOptions, WorkerEndpoint,
    WorkerMessage,
};
pub use error::{WorkletError, WorkletResult};
pub use harness::{write_wav, HarnessError, WorkletHarness, WorkletNode};
pub use layout::BusLayout;
pub use port::{message_channel, MessagePort};
pub use processor::{
    AudioWorkletProcessor, AutomationRate, ParameterDescriptor, ParameterValues, ProcessorDef,
    ProcessorOptions,
};
pub use scope::{GlobalScope, ModuleCatalog, WorkletScope};
pub use states::LifecycleState;

/// Opaque id of the host-side graph node a processor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostNodeId(pub u64);

/// Worker-assigned processor id: its index in the instance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessorId(pub usize);

impl std::fmt::Display for HostNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scope configuration: queue sizing for the control channel and ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkletConfig {
    /// Messages per direction on the host ↔ worker control channel.
    pub control_queue_capacity: usize,
    /// Messages per direction on each processor's message port.
    pub port_queue_capacity: usize,
}

impl Default for WorkletConfig {
    fn default() -> Self {
        Self {
            control_queue_capacity: control::CONTROL_QUEUE_CAPACITY,
            port_queue_capacity: port::PORT_QUEUE_CAPACITY,
        }
    }
}

impl WorkletConfig {
    /// Parse a JSON config; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config = WorkletConfig::from_json_str(r#"{ "portQueueCapacity": 8 }"#).unwrap();
        assert_eq!(config.port_queue_capacity, 8);
        assert_eq!(config.control_queue_capacity, control::CONTROL_QUEUE_CAPACITY);
    }

    #[test]
    fn ids_serialize_as_bare_numbers() {
        assert_eq!(serde_json::to_string(&HostNodeId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&ProcessorId(0)).unwrap(), "0");
    }
}
