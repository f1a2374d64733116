//! Worklet scope: the worker-side control-message handler.
//!
//! A [`WorkletScope`] owns the registry, the instance table and the ambient
//! sample rate for one worker context. Every inbound message is handled to
//! completion before the next one; there is no internal parallelism.
//!
//! Construction failures are reported twice: a `state: error` message is
//! posted to the host, then the error is returned to the caller.

use crate::buffer::build_slices;
use crate::control::{CreateProcessorArgs, HostMessage, MessageSource, Outbox, WorkerEndpoint, WorkerMessage};
use crate::error::{WorkletError, WorkletResult};
use crate::instance::{InstanceTable, ProcessorInstance};
use crate::invariant_ppt::{assert_invariant, RUNNING_AFTER_APPEND};
use crate::port::MessagePort;
use crate::processor::{ParameterValues, ProcessorDef};
use crate::registry::{self, Registry};
use crate::states::{LifecycleState, ProcessorState};
use crate::{ProcessorId, WorkletConfig};
use rtrb::{Consumer, Producer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Module initializer run on `import`. It registers the module's processors.
pub type ModuleInit = fn(&mut GlobalScope<'_>);

/// The code a scope can import, keyed by url.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    modules: HashMap<String, ModuleInit>,
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.modules.keys()).finish()
    }
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module (builder style).
    pub fn module(mut self, url: impl Into<String>, init: ModuleInit) -> Self {
        self.insert(url, init);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, init: ModuleInit) {
        self.modules.insert(url.into(), init);
    }

    pub fn resolve(&self, url: &str) -> Option<ModuleInit> {
        self.modules.get(url).copied()
    }
}

/// What a module sees while it loads.
pub struct GlobalScope<'a> {
    registry: &'a mut Registry,
    outbox: &'a mut dyn Outbox,
    sample_rate: f32,
}

impl GlobalScope<'_> {
    /// Register a processor type under `name`. Only the first registration of
    /// a name takes effect.
    pub fn register_processor<D: ProcessorDef>(&mut self, name: &str, def: D) {
        self.registry.register(name, Arc::new(def), &mut *self.outbox);
    }

    /// Sample rate of the most recently created processor, 0 before any.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

/// The worker context.
pub struct WorkletScope<O: Outbox> {
    config: WorkletConfig,
    catalog: ModuleCatalog,
    registry: Registry,
    instances: InstanceTable,
    outbox: O,
    sample_rate: f32,
}

impl WorkletScope<Producer<WorkerMessage>> {
    /// Build a scope posting to `endpoint`. Returns the scope and the inbound
    /// queue to [`pump`](WorkletScope::pump) it with.
    pub fn from_endpoint(
        config: WorkletConfig,
        catalog: ModuleCatalog,
        endpoint: WorkerEndpoint,
    ) -> (Self, Consumer<HostMessage>) {
        let WorkerEndpoint { inbound, outbound } = endpoint;
        (Self::new(config, catalog, outbound), inbound)
    }
}

impl<O: Outbox> WorkletScope<O> {
    pub fn new(config: WorkletConfig, catalog: ModuleCatalog, outbox: O) -> Self {
        Self {
            config,
            catalog,
            registry: Registry::new(),
            instances: InstanceTable::new(),
            outbox,
            sample_rate: 0.0,
        }
    }

    /// Handle one control message to completion.
    pub fn handle_message(&mut self, msg: HostMessage) -> WorkletResult {
        match msg {
            HostMessage::Import { url } => self.import(&url),
            HostMessage::CreateProcessor { args, port } => self.create_processor(args, port).map(|_| ()),
            HostMessage::Process { processor, index } => {
                self.process(processor, index);
                Ok(())
            }
            HostMessage::Dispose { processor } => {
                self.dispose(processor);
                Ok(())
            }
        }
    }

    /// Handle every pending message in arrival order. Failures were already
    /// reported to the host and do not stop the pump. Returns the number of
    /// messages handled.
    pub fn pump(&mut self, source: &mut impl MessageSource) -> usize {
        let mut handled = 0;
        while let Some(msg) = source.pop() {
            let kind = msg.description();
            if let Err(err) = self.handle_message(msg) {
                warn!(message = kind, %err, "control message failed");
            }
            handled += 1;
        }
        handled
    }

    /// Load the module at `url`, then acknowledge with `load`.
    pub fn import(&mut self, url: &str) -> WorkletResult {
        let Some(init) = self.catalog.resolve(url) else {
            warn!(url, "import of unknown module");
            return Err(WorkletError::ModuleNotFound { url: url.to_string() });
        };

        let mut global = GlobalScope {
            registry: &mut self.registry,
            outbox: &mut self.outbox,
            sample_rate: self.sample_rate,
        };
        init(&mut global);

        info!(url, "module loaded");
        self.outbox.post(WorkerMessage::Load { url: url.to_string() });
        Ok(())
    }

    /// Register a processor type directly, as a module initializer would.
    pub fn register_processor<D: ProcessorDef>(&mut self, name: &str, def: D) {
        self.registry.register(name, Arc::new(def), &mut self.outbox);
    }

    /// Slice the bus, construct the processor and enter it in the table.
    pub fn create_processor(&mut self, args: CreateProcessorArgs, port: MessagePort) -> WorkletResult<ProcessorId> {
        let CreateProcessorArgs { name, node, options } = args;
        self.sample_rate = options.sample_rate;

        let slices = match build_slices(&options.bus, options.samples_per_buffer, options.bus.buffer_count) {
            Ok(slices) => slices,
            Err(err) => return Err(registry::report(&mut self.outbox, node, err.into())),
        };

        let processor = self.registry.create(&name, node, port, options, &mut self.outbox)?;
        let parameters = self
            .registry
            .definition(&name)
            .map(|d| ParameterValues::from_descriptors(&d.parameter_descriptors))
            .unwrap_or_default();

        let id = self
            .instances
            .append(ProcessorInstance::new(name.as_str(), node, parameters, processor), slices);
        assert_invariant(
            RUNNING_AFTER_APPEND,
            self.instances.state(id) == ProcessorState::Running,
            "appended processor is running",
            Some(name.as_str()),
        );

        info!(name = %name, node = node.0, processor = id.0, "processor running");
        self.outbox.post(WorkerMessage::State {
            node,
            processor: Some(id),
            state: LifecycleState::Running,
        });
        Ok(id)
    }

    /// Render one block from slot `index`. Unknown ids are ignored.
    pub fn process(&mut self, processor: ProcessorId, index: usize) {
        self.instances.dispatch_process(processor, index);
    }

    /// Dispose processor `id` and announce it. Unknown ids are ignored.
    pub fn dispose(&mut self, id: ProcessorId) {
        match self.instances.dispose(id) {
            Some(node) => {
                info!(node = node.0, processor = id.0, "processor disposed");
                self.outbox.post(WorkerMessage::State {
                    node,
                    processor: Some(id),
                    state: LifecycleState::Disposed,
                });
            }
            None => debug!(processor = id.0, "dispose for unknown processor dropped"),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    /// Sample rate of the most recently created processor, 0 before any.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn config(&self) -> &WorkletConfig {
        &self.config
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut O {
        &mut self.outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BusDescriptor, SampleBuffer, SliceError};
    use crate::control::NodeOptions;
    use crate::port::message_channel;
    use crate::processor::{AudioWorkletProcessor, ParameterDescriptor, ProcessorOptions};
    use crate::HostNodeId;

    struct Mute(MessagePort);

    impl AudioWorkletProcessor for Mute {
        fn process(&mut self, _: &[Vec<&[f32]>], outputs: &mut [Vec<&mut [f32]>], _: &ParameterValues) -> bool {
            for channel in outputs.iter_mut().flatten() {
                channel.fill(0.0);
            }
            true
        }

        fn port(&self) -> Option<&MessagePort> {
            Some(&self.0)
        }
    }

    struct MuteDef;

    impl ProcessorDef for MuteDef {
        type Processor = Mute;

        fn parameter_descriptors(&self) -> Vec<ParameterDescriptor> {
            vec![ParameterDescriptor::new("level").default_value(0.25)]
        }

        fn construct(&self, mut options: ProcessorOptions) -> Mute {
            Mute(options.take_port().unwrap())
        }
    }

    fn mute_module(scope: &mut GlobalScope<'_>) {
        scope.register_processor("mute", MuteDef);
    }

    fn scope() -> WorkletScope<Vec<WorkerMessage>> {
        WorkletScope::new(
            WorkletConfig::default(),
            ModuleCatalog::new().module("mute.js", mute_module),
            Vec::new(),
        )
    }

    fn args(name: &str, node: u64, len: usize) -> CreateProcessorArgs {
        CreateProcessorArgs {
            name: name.into(),
            node: HostNodeId(node),
            options: NodeOptions {
                samples_per_buffer: 64,
                sample_rate: 44_100.0,
                bus: BusDescriptor {
                    buffer_count: 1,
                    input: vec![vec![SampleBuffer::zeroed(len)]],
                    output: vec![vec![SampleBuffer::zeroed(len)]],
                },
                processor_options: serde_json::Value::Null,
            },
        }
    }

    #[test]
    fn import_registers_then_loads() {
        let mut scope = scope();
        scope.import("mute.js").unwrap();
        assert_eq!(
            scope.outbox(),
            &vec![
                WorkerMessage::Register {
                    name: "mute".into(),
                    descriptor: vec![ParameterDescriptor::new("level").default_value(0.25)],
                },
                WorkerMessage::Load { url: "mute.js".into() },
            ]
        );
    }

    #[test]
    fn second_import_only_loads() {
        let mut scope = scope();
        scope.import("mute.js").unwrap();
        scope.outbox_mut().clear();
        scope.import("mute.js").unwrap();
        assert_eq!(scope.outbox(), &vec![WorkerMessage::Load { url: "mute.js".into() }]);
    }

    #[test]
    fn unknown_module_posts_nothing() {
        let mut scope = scope();
        let err = scope.import("nope.js").unwrap_err();
        assert_eq!(err, WorkletError::ModuleNotFound { url: "nope.js".into() });
        assert!(scope.outbox().is_empty());
    }

    #[test]
    fn create_sets_sample_rate_and_seeds_parameters() {
        let mut scope = scope();
        scope.import("mute.js").unwrap();
        let (_host, port) = message_channel(1);
        let id = scope.create_processor(args("mute", 2, 64), port).unwrap();

        assert_eq!(scope.sample_rate(), 44_100.0);
        let entry = scope.instances().get(id).unwrap();
        assert_eq!(entry.instance.parameters.get("level"), Some(0.25));
        assert_eq!(entry.slices.len(), 1);
    }

    #[test]
    fn short_bus_is_reported_as_error_state() {
        let mut scope = scope();
        scope.import("mute.js").unwrap();
        scope.outbox_mut().clear();
        let (_host, port) = message_channel(1);
        let err = scope.create_processor(args("mute", 5, 10), port).unwrap_err();

        assert!(matches!(err, WorkletError::InvalidBus(SliceError::BufferTooShort { .. })));
        assert_eq!(
            scope.outbox(),
            &vec![WorkerMessage::State {
                node: HostNodeId(5),
                processor: None,
                state: LifecycleState::Error,
            }]
        );
        assert!(scope.instances().is_empty());
    }

    #[test]
    fn dispose_announces_and_retires_id() {
        let mut scope = scope();
        scope.import("mute.js").unwrap();
        let (_host, port) = message_channel(1);
        let id = scope.create_processor(args("mute", 3, 64), port).unwrap();
        scope.outbox_mut().clear();

        scope.dispose(id);
        scope.dispose(id);
        assert_eq!(
            scope.outbox(),
            &vec![WorkerMessage::State {
                node: HostNodeId(3),
                processor: Some(id),
                state: LifecycleState::Disposed,
            }]
        );
        assert_eq!(scope.instances().state(id), ProcessorState::Disposed);
    }
}
