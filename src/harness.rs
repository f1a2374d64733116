//! In-process host harness.
//!
//! Plays the host side of the control protocol against a real
//! [`WorkletScope`] over real queues: allocates buses, creates nodes, drives
//! blocks through the ping-pong slots and collects the rendered output. Used
//! by the integration tests, the demos and the benchmark.

use crate::buffer::{build_slices, BufferSlice, BusDescriptor};
use crate::control::{
    worklet_channel, ControlError, CreateProcessorArgs, HostEndpoint, HostMessage, NodeOptions, WorkerMessage,
};
use crate::layout::BusLayout;
use crate::port::{message_channel, MessagePort};
use crate::scope::{ModuleCatalog, WorkletScope};
use crate::states::LifecycleState;
use crate::{HostNodeId, ProcessorId, WorkletConfig};
use rtrb::{Consumer, Producer};
use serde_json::Value;
use std::path::Path;

/// Errors driving the harness.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("worker rejected node {0}")]
    Rejected(HostNodeId),

    #[error("worker sent no state for node {0}")]
    NoResponse(HostNodeId),

    #[error("failed to write wav: {0}")]
    Wav(#[from] hound::Error),

    #[error("wav files hold at most 65535 channels, got {0}")]
    TooManyChannels(usize),
}

/// Host-side view of a created node.
#[derive(Debug)]
pub struct WorkletNode {
    pub node: HostNodeId,
    pub processor: ProcessorId,
    pub bus: BusDescriptor,
    /// The host's end of the processor's message port.
    pub port: MessagePort,
    slots: Vec<BufferSlice>,
}

impl WorkletNode {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Host-side views of slot `slot`, sharing storage with the worker.
    pub fn slot(&self, slot: usize) -> Option<&BufferSlice> {
        self.slots.get(slot)
    }
}

pub struct WorkletHarness {
    scope: WorkletScope<Producer<WorkerMessage>>,
    inbound: Consumer<HostMessage>,
    host: HostEndpoint,
    config: WorkletConfig,
    next_node: u64,
}

impl WorkletHarness {
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self::with_config(WorkletConfig::default(), catalog)
    }

    pub fn with_config(config: WorkletConfig, catalog: ModuleCatalog) -> Self {
        let (host, worker) = worklet_channel(config.control_queue_capacity);
        let (scope, inbound) = WorkletScope::from_endpoint(config.clone(), catalog, worker);
        Self {
            scope,
            inbound,
            host,
            config,
            next_node: 0,
        }
    }

    /// Queue a message for the worker without running it.
    pub fn send(&mut self, msg: HostMessage) -> Result<(), HarnessError> {
        Ok(self.host.send(msg)?)
    }

    /// Let the worker handle everything queued so far.
    pub fn pump(&mut self) -> usize {
        self.scope.pump(&mut self.inbound)
    }

    /// Take every message the worker has posted.
    pub fn drain(&mut self) -> Vec<WorkerMessage> {
        self.host.drain()
    }

    /// Send, pump, and return what the worker answered.
    pub fn roundtrip(&mut self, msg: HostMessage) -> Result<Vec<WorkerMessage>, HarnessError> {
        self.send(msg)?;
        self.pump();
        Ok(self.drain())
    }

    pub fn import(&mut self, url: &str) -> Result<Vec<WorkerMessage>, HarnessError> {
        self.roundtrip(HostMessage::Import { url: url.to_string() })
    }

    /// Allocate a bus for `layout` and create processor `name` over it.
    pub fn create_node(
        &mut self,
        name: &str,
        layout: &BusLayout,
        sample_rate: f32,
        processor_options: Value,
    ) -> Result<WorkletNode, HarnessError> {
        let node = HostNodeId(self.next_node);
        self.next_node += 1;

        let bus = layout.build();
        // The harness built the storage itself, so it always slices.
        let slots = build_slices(&bus, layout.samples_per_buffer(), layout.buffer_count()).unwrap_or_default();
        let (port, worker_port) = message_channel(self.config.port_queue_capacity);
        let args = CreateProcessorArgs {
            name: name.to_string(),
            node,
            options: NodeOptions {
                samples_per_buffer: layout.samples_per_buffer(),
                sample_rate,
                bus: bus.clone(),
                processor_options,
            },
        };

        let replies = self.roundtrip(HostMessage::CreateProcessor { args, port: worker_port })?;
        let state = replies.into_iter().find_map(|msg| match msg {
            WorkerMessage::State {
                node: n,
                processor,
                state,
            } if n == node => Some((processor, state)),
            _ => None,
        });

        match state {
            Some((Some(processor), LifecycleState::Running)) => Ok(WorkletNode {
                node,
                processor,
                bus,
                port,
                slots,
            }),
            Some(_) => Err(HarnessError::Rejected(node)),
            None => Err(HarnessError::NoResponse(node)),
        }
    }

    /// Render one block from `slot` of `node`.
    pub fn process(&mut self, node: &WorkletNode, slot: usize) -> Result<(), HarnessError> {
        self.send(HostMessage::Process {
            processor: node.processor,
            index: slot,
        })?;
        self.pump();
        Ok(())
    }

    pub fn dispose(&mut self, node: &WorkletNode) -> Result<Vec<WorkerMessage>, HarnessError> {
        self.roundtrip(HostMessage::Dispose {
            processor: node.processor,
        })
    }

    /// Render `blocks` blocks, cycling through the ping-pong slots.
    ///
    /// Before each block `fill_input(block, slot)` may write the slot's input
    /// views. Returns one sample vector per output channel, ports in order.
    pub fn render_offline(
        &mut self,
        node: &WorkletNode,
        blocks: usize,
        mut fill_input: impl FnMut(usize, &BufferSlice),
    ) -> Result<Vec<Vec<f32>>, HarnessError> {
        let channels: usize = node.bus.output.iter().map(Vec::len).sum();
        let block_len = node.slots.first().map_or(0, |s| {
            s.output.ports.iter().flatten().next().map_or(0, |v| v.len())
        });
        let mut rendered = vec![Vec::with_capacity(blocks * block_len); channels];
        if node.slots.is_empty() {
            return Ok(rendered);
        }

        for block in 0..blocks {
            let slot = block % node.slots.len();
            let views = &node.slots[slot];
            fill_input(block, views);
            self.process(node, slot)?;
            for (out, view) in rendered.iter_mut().zip(views.output.ports.iter().flatten()) {
                out.extend_from_slice(&view.to_vec());
            }
        }
        Ok(rendered)
    }

    pub fn scope(&self) -> &WorkletScope<Producer<WorkerMessage>> {
        &self.scope
    }
}

/// Write rendered channels to a 16-bit WAV file.
pub fn write_wav(path: impl AsRef<Path>, channels: &[Vec<f32>], sample_rate: u32) -> Result<(), HarnessError> {
    let count = u16::try_from(channels.len()).map_err(|_| HarnessError::TooManyChannels(channels.len()))?;
    let spec = hound::WavSpec {
        channels: count,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            let sample = channel[frame].clamp(-1.0, 1.0);
            writer.write_sample((sample * 32767.0) as i16)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MessagePort;
    use crate::processor::{AudioWorkletProcessor, ParameterValues, ProcessorDef, ProcessorOptions};
    use crate::scope::GlobalScope;

    struct Ramp {
        port: MessagePort,
        next: f32,
    }

    impl AudioWorkletProcessor for Ramp {
        fn process(&mut self, _: &[Vec<&[f32]>], outputs: &mut [Vec<&mut [f32]>], _: &ParameterValues) -> bool {
            for sample in outputs[0][0].iter_mut() {
                *sample = self.next;
                self.next += 1.0;
            }
            true
        }

        fn port(&self) -> Option<&MessagePort> {
            Some(&self.port)
        }
    }

    struct RampDef;

    impl ProcessorDef for RampDef {
        type Processor = Ramp;

        fn construct(&self, mut options: ProcessorOptions) -> Ramp {
            Ramp {
                port: options.take_port().unwrap(),
                next: 0.0,
            }
        }
    }

    fn ramp_module(scope: &mut GlobalScope<'_>) {
        scope.register_processor("ramp", RampDef);
    }

    #[test]
    fn harness_renders_across_slots() {
        let mut harness = WorkletHarness::new(ModuleCatalog::new().module("ramp", ramp_module));
        harness.import("ramp").unwrap();
        let node = harness
            .create_node("ramp", &BusLayout::new(4, 2).output(1), 48_000.0, Value::Null)
            .unwrap();

        let out = harness.render_offline(&node, 3, |_, _| {}).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], (0..12).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn unknown_processor_is_rejected() {
        let mut harness = WorkletHarness::new(ModuleCatalog::new());
        let err = harness
            .create_node("missing", &BusLayout::new(4, 1).output(1), 48_000.0, Value::Null)
            .unwrap_err();
        assert!(matches!(err, HarnessError::Rejected(HostNodeId(0))));
    }

    #[test]
    fn wav_bounce_writes_frames() {
        let path = std::env::temp_dir().join("polyworklet_harness_bounce.wav");
        write_wav(&path, &[vec![0.0, 0.5, -0.5], vec![1.0, -1.0, 0.0]], 48_000).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 3);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wav_rejects_unrepresentable_channel_count() {
        let path = std::env::temp_dir().join("polyworklet_harness_too_wide.wav");
        let channels = vec![Vec::new(); usize::from(u16::MAX) + 1];
        let err = write_wav(&path, &channels, 48_000).unwrap_err();
        assert!(matches!(err, HarnessError::TooManyChannels(65_536)));
        assert!(!path.exists());
    }
}
