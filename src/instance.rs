//! Instance table: an append-only arena of live processors and their slots.
//!
//! Ids are arena indices. A new instance gets `id = len()`, so ids are dense,
//! monotonic and never reused. The table never shrinks: disposal leaves a
//! tombstone behind and the id stays retired. Without disposal an instance
//! lives until the scope is dropped.

use crate::buffer::{Bus, BufferSlice};
use crate::invariant_ppt::{assert_invariant, DISPOSE_KEEPS_ID, INSTANCE_ID_MONOTONIC, TABLE_APPEND_ONLY};
use crate::processor::{AudioWorkletProcessor, ParameterValues};
use crate::states::ProcessorState;
use crate::{HostNodeId, ProcessorId};
use std::sync::MutexGuard;
use tracing::{debug, error};

/// A constructed processor tagged with its host node.
pub struct ProcessorInstance {
    pub name: String,
    pub node: HostNodeId,
    pub parameters: ParameterValues,
    processor: Box<dyn AudioWorkletProcessor>,
}

impl ProcessorInstance {
    pub fn new(
        name: impl Into<String>,
        node: HostNodeId,
        parameters: ParameterValues,
        processor: Box<dyn AudioWorkletProcessor>,
    ) -> Self {
        Self {
            name: name.into(),
            node,
            parameters,
            processor,
        }
    }
}

impl std::fmt::Debug for ProcessorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorInstance")
            .field("name", &self.name)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// A table entry: the instance plus its ping-pong slots, indexed by slot.
#[derive(Debug)]
pub struct InstanceEntry {
    pub instance: ProcessorInstance,
    pub slices: Vec<BufferSlice>,
}

#[derive(Debug, Default)]
pub struct InstanceTable {
    /// `None` marks a disposed instance.
    entries: Vec<Option<InstanceEntry>>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `instance` and return its id, the table length before the call.
    pub fn append(&mut self, instance: ProcessorInstance, slices: Vec<BufferSlice>) -> ProcessorId {
        let before = self.entries.len();
        let id = ProcessorId(before);
        self.entries.push(Some(InstanceEntry { instance, slices }));
        assert_invariant(INSTANCE_ID_MONOTONIC, id.0 == before, "id equals table length", Some("append"));
        assert_invariant(TABLE_APPEND_ONLY, self.entries.len() == before + 1, "table grows by one", Some("append"));
        id
    }

    /// Render one block from slot `slot` of processor `id`.
    ///
    /// Unknown or disposed ids and out-of-range slots are ignored. The
    /// processor's keep-alive flag is not interpreted here. A panicking
    /// processor has its output views zeroed.
    pub fn dispatch_process(&mut self, id: ProcessorId, slot: usize) {
        // IMPORTANT: per-block path, no invariant logging here.
        let Some(entry) = self.entries.get_mut(id.0).and_then(Option::as_mut) else {
            debug!(processor = id.0, "process for unknown processor dropped");
            return;
        };
        let Some(slice) = entry.slices.get(slot) else {
            debug!(processor = id.0, slot, "process for unknown slot dropped");
            return;
        };

        let input_guards = lock_bus(&slice.input);
        let mut output_guards = lock_bus(&slice.output);

        let inputs: Vec<Vec<&[f32]>> = input_guards
            .iter()
            .zip(&slice.input.ports)
            .map(|(guards, views)| {
                guards
                    .iter()
                    .zip(views)
                    .map(|(guard, view)| &guard.as_slice()[view.range()])
                    .collect()
            })
            .collect();
        let mut outputs: Vec<Vec<&mut [f32]>> = output_guards
            .iter_mut()
            .zip(&slice.output.ports)
            .map(|(guards, views)| {
                guards
                    .iter_mut()
                    .zip(views)
                    .map(|(guard, view)| &mut guard.as_mut_slice()[view.range()])
                    .collect()
            })
            .collect();

        let instance = &mut entry.instance;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            instance
                .processor
                .process(&inputs, &mut outputs, &instance.parameters)
        }));
        if result.is_err() {
            error!(processor = id.0, node = instance.node.0, slot, "processor panicked, block silenced");
            for channel in outputs.iter_mut().flatten() {
                channel.fill(0.0);
            }
        }
    }

    /// Drop processor `id`, keeping its id retired. Returns the node it
    /// belonged to, or `None` if there was nothing to dispose.
    pub fn dispose(&mut self, id: ProcessorId) -> Option<HostNodeId> {
        let before = self.entries.len();
        let entry = self.entries.get_mut(id.0)?.take()?;
        assert_invariant(DISPOSE_KEEPS_ID, self.entries.len() == before, "dispose leaves a tombstone", Some("dispose"));
        Some(entry.instance.node)
    }

    pub fn get(&self, id: ProcessorId) -> Option<&InstanceEntry> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    pub fn state(&self, id: ProcessorId) -> ProcessorState {
        match self.entries.get(id.0) {
            None => ProcessorState::Idle,
            Some(None) => ProcessorState::Disposed,
            Some(Some(_)) => ProcessorState::Running,
        }
    }

    /// Table length, disposed entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

fn lock_bus(bus: &Bus) -> Vec<Vec<MutexGuard<'_, Vec<f32>>>> {
    bus.ports
        .iter()
        .map(|port| port.iter().map(|view| view.buffer().lock()).collect())
        .collect()
}
