//! Processor registry: name → definition.
//!
//! Entries are write-once. The first registration of a name wins; later ones
//! are silently ignored, so re-importing a module is harmless. Nothing is ever
//! removed: the registry lives as long as its scope.

use crate::control::{NodeOptions, Outbox, WorkerMessage};
use crate::error::{WorkletError, WorkletResult};
use crate::invariant_ppt::{assert_invariant, DESCRIPTORS_CAPTURED, REGISTRY_WRITE_ONCE};
use crate::port::MessagePort;
use crate::processor::{AudioWorkletProcessor, ParameterDescriptor, ProcessorDefDyn, ProcessorOptions};
use crate::states::LifecycleState;
use crate::HostNodeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A registered processor type.
#[derive(Clone)]
pub struct ProcessorDefinition {
    pub name: String,
    pub parameter_descriptors: Vec<ParameterDescriptor>,
    ctor: Arc<dyn ProcessorDefDyn>,
}

impl std::fmt::Debug for ProcessorDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorDefinition")
            .field("name", &self.name)
            .field("parameter_descriptors", &self.parameter_descriptors)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    definitions: HashMap<String, ProcessorDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ctor` under `name` and announce it to the host.
    ///
    /// Parameter ranges that are inverted or NaN are normalized once here, so
    /// seeding values at construction never sees them.
    ///
    /// A name that is already registered is left untouched and nothing is
    /// posted.
    pub fn register(&mut self, name: &str, ctor: Arc<dyn ProcessorDefDyn>, outbox: &mut dyn Outbox) {
        if self.definitions.contains_key(name) {
            tracing::debug!(name, "processor already registered, keeping first definition");
            return;
        }

        let parameter_descriptors: Vec<ParameterDescriptor> = ctor
            .parameter_descriptors()
            .iter()
            .map(|d| {
                if d.is_well_formed() {
                    d.clone()
                } else {
                    warn!(name, parameter = %d.name, "malformed parameter range normalized");
                    d.normalized()
                }
            })
            .collect();
        let definition = ProcessorDefinition {
            name: name.to_string(),
            parameter_descriptors: parameter_descriptors.clone(),
            ctor,
        };
        let previous = self.definitions.insert(name.to_string(), definition);
        assert_invariant(REGISTRY_WRITE_ONCE, previous.is_none(), "name written once", Some(name));
        assert_invariant(
            DESCRIPTORS_CAPTURED,
            self.definitions.get(name).map(|d| d.parameter_descriptors.len()) == Some(parameter_descriptors.len()),
            "descriptors captured at registration",
            Some(name),
        );

        info!(name, parameters = parameter_descriptors.len(), "processor registered");
        outbox.post(WorkerMessage::Register {
            name: name.to_string(),
            descriptor: parameter_descriptors,
        });
    }

    /// Construct a processor registered under `name`, injecting `port`.
    ///
    /// The processor must keep the injected port: `port()` has to return the
    /// end of that channel, not a port of its own. On failure a `state: error` for `node` is posted before the error is
    /// returned.
    pub fn create(
        &self,
        name: &str,
        node: HostNodeId,
        port: MessagePort,
        options: NodeOptions,
        outbox: &mut dyn Outbox,
    ) -> WorkletResult<Box<dyn AudioWorkletProcessor>> {
        let Some(definition) = self.definitions.get(name) else {
            return Err(report(outbox, node, WorkletError::NotSupported { name: name.to_string() }));
        };

        let injected = port.channel_id();
        let options = ProcessorOptions::new(
            node,
            options.sample_rate,
            options.samples_per_buffer,
            &options.bus,
            options.processor_options,
            port,
        );
        let processor = definition.ctor.construct(options);
        let capable = processor.port().map(MessagePort::channel_id) == Some(injected);
        if !capable {
            return Err(report(outbox, node, WorkletError::InvalidState { name: name.to_string() }));
        }
        Ok(processor)
    }

    pub fn definition(&self, name: &str) -> Option<&ProcessorDefinition> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Post `state: error` for `node`, then hand the error back for raising.
pub(crate) fn report(outbox: &mut dyn Outbox, node: HostNodeId, err: WorkletError) -> WorkletError {
    error!(node = node.0, %err, "processor construction failed");
    outbox.post(WorkerMessage::State {
        node,
        processor: None,
        state: LifecycleState::Error,
    });
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BusDescriptor;
    use crate::port::message_channel;
    use crate::processor::{ParameterValues, ProcessorDef};

    struct Silence {
        port: MessagePort,
    }

    impl AudioWorkletProcessor for Silence {
        fn process(&mut self, _: &[Vec<&[f32]>], _: &mut [Vec<&mut [f32]>], _: &ParameterValues) -> bool {
            true
        }

        fn port(&self) -> Option<&MessagePort> {
            Some(&self.port)
        }
    }

    struct SilenceDef(&'static str);

    impl ProcessorDef for SilenceDef {
        type Processor = Silence;

        fn parameter_descriptors(&self) -> Vec<ParameterDescriptor> {
            vec![ParameterDescriptor::new(self.0)]
        }

        fn construct(&self, mut options: ProcessorOptions) -> Silence {
            Silence {
                port: options.take_port().unwrap(),
            }
        }
    }

    fn options() -> NodeOptions {
        NodeOptions {
            samples_per_buffer: 128,
            sample_rate: 48_000.0,
            bus: BusDescriptor::default(),
            processor_options: serde_json::Value::Null,
        }
    }

    #[test]
    fn first_registration_wins() {
        let mut registry = Registry::new();
        let mut outbox: Vec<WorkerMessage> = Vec::new();
        registry.register("x", Arc::new(SilenceDef("a")), &mut outbox);
        registry.register("x", Arc::new(SilenceDef("b")), &mut outbox);

        let def = registry.definition("x").unwrap();
        assert_eq!(def.parameter_descriptors, vec![ParameterDescriptor::new("a")]);
        assert_eq!(outbox.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_name_reports_then_fails() {
        let registry = Registry::new();
        let mut outbox: Vec<WorkerMessage> = Vec::new();
        let (_host, worker) = message_channel(1);
        let err = registry
            .create("missing", HostNodeId(4), worker, options(), &mut outbox)
            .err()
            .unwrap();
        assert_eq!(err, WorkletError::NotSupported { name: "missing".into() });
        assert_eq!(
            outbox,
            vec![WorkerMessage::State {
                node: HostNodeId(4),
                processor: None,
                state: LifecycleState::Error,
            }]
        );
    }

    #[test]
    fn registered_name_constructs() {
        let mut registry = Registry::new();
        let mut outbox: Vec<WorkerMessage> = Vec::new();
        registry.register("silence", Arc::new(SilenceDef("p")), &mut outbox);
        let (_host, worker) = message_channel(1);
        let processor = registry
            .create("silence", HostNodeId(1), worker, options(), &mut outbox)
            .unwrap();
        assert!(processor.port().is_some());
        assert_eq!(outbox.len(), 1);
        assert_eq!(registry.names(), vec!["silence"]);
    }

    struct Foreign {
        port: MessagePort,
    }

    impl AudioWorkletProcessor for Foreign {
        fn process(&mut self, _: &[Vec<&[f32]>], _: &mut [Vec<&mut [f32]>], _: &ParameterValues) -> bool {
            true
        }

        fn port(&self) -> Option<&MessagePort> {
            Some(&self.port)
        }
    }

    struct ForeignDef;

    impl ProcessorDef for ForeignDef {
        type Processor = Foreign;

        fn construct(&self, _: ProcessorOptions) -> Foreign {
            Foreign {
                port: message_channel(1).1,
            }
        }
    }

    #[test]
    fn swapped_port_is_invalid_state() {
        let mut registry = Registry::new();
        let mut outbox: Vec<WorkerMessage> = Vec::new();
        registry.register("foreign", Arc::new(ForeignDef), &mut outbox);
        outbox.clear();

        let (_host, worker) = message_channel(1);
        let err = registry
            .create("foreign", HostNodeId(2), worker, options(), &mut outbox)
            .err()
            .unwrap();
        assert_eq!(err, WorkletError::InvalidState { name: "foreign".into() });
        assert_eq!(
            outbox,
            vec![WorkerMessage::State {
                node: HostNodeId(2),
                processor: None,
                state: LifecycleState::Error,
            }]
        );
    }

    struct InvertedDef;

    impl ProcessorDef for InvertedDef {
        type Processor = Silence;

        fn parameter_descriptors(&self) -> Vec<ParameterDescriptor> {
            vec![ParameterDescriptor::new("x").default_value(0.5).range(1.0, 0.0)]
        }

        fn construct(&self, mut options: ProcessorOptions) -> Silence {
            Silence {
                port: options.take_port().unwrap(),
            }
        }
    }

    #[test]
    fn malformed_ranges_are_normalized_at_registration() {
        let mut registry = Registry::new();
        let mut outbox: Vec<WorkerMessage> = Vec::new();
        registry.register("inverted", Arc::new(InvertedDef), &mut outbox);

        let stored = &registry.definition("inverted").unwrap().parameter_descriptors[0];
        assert_eq!((stored.min_value, stored.max_value), (0.0, 1.0));
        assert_eq!(
            outbox,
            vec![WorkerMessage::Register {
                name: "inverted".into(),
                descriptor: vec![stored.clone()],
            }]
        );
    }
}
