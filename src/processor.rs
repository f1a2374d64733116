//! Trait-based processor definitions for user-authored audio units.
//!
//! A unit type is described by a [`ProcessorDef`]: it reports its parameter
//! descriptors once, at registration, and constructs [`AudioWorkletProcessor`]
//! instances on demand. The registry stores definitions type-erased behind
//! [`ProcessorDefDyn`].

#![forbid(unsafe_code)]

use crate::port::MessagePort;
use crate::HostNodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How often a parameter may change value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomationRate {
    /// Per sample.
    #[default]
    #[serde(rename = "a-rate")]
    ARate,
    /// Per block.
    #[serde(rename = "k-rate")]
    KRate,
}

/// Static description of one processor parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(default)]
    pub default_value: f32,
    #[serde(default = "lowest")]
    pub min_value: f32,
    #[serde(default = "highest")]
    pub max_value: f32,
    #[serde(default)]
    pub automation_rate: AutomationRate,
}

fn lowest() -> f32 {
    f32::MIN
}

fn highest() -> f32 {
    f32::MAX
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: 0.0,
            min_value: lowest(),
            max_value: highest(),
            automation_rate: AutomationRate::ARate,
        }
    }

    pub fn default_value(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }

    pub fn range(mut self, min: f32, max: f32) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn automation_rate(mut self, rate: AutomationRate) -> Self {
        self.automation_rate = rate;
        self
    }

    /// True when both bounds are numbers, `min <= max`, and the default is a number.
    pub fn is_well_formed(&self) -> bool {
        !self.min_value.is_nan()
            && !self.max_value.is_nan()
            && !self.default_value.is_nan()
            && self.min_value <= self.max_value
    }

    /// A well-formed copy: NaN bounds fall back to the full `f32` range,
    /// inverted bounds are swapped and a NaN default becomes `0`.
    pub fn normalized(&self) -> Self {
        let min = if self.min_value.is_nan() { lowest() } else { self.min_value };
        let max = if self.max_value.is_nan() { highest() } else { self.max_value };
        let default = if self.default_value.is_nan() { 0.0 } else { self.default_value };
        Self {
            name: self.name.clone(),
            default_value: default,
            min_value: min.min(max),
            max_value: max.max(min),
            automation_rate: self.automation_rate,
        }
    }
}

/// Current parameter values handed to every `process` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    values: HashMap<String, f32>,
}

impl ParameterValues {
    /// Seed every parameter with its descriptor's default, clamped to its range.
    pub fn from_descriptors(descriptors: &[ParameterDescriptor]) -> Self {
        let values = descriptors
            .iter()
            .map(|d| (d.name.clone(), d.default_value.max(d.min_value).min(d.max_value)))
            .collect();
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Options handed to a processor constructor.
///
/// The worker injects `port` before construction; the processor is expected to
/// keep it (see [`ProcessorOptions::take_port`]).
#[derive(Debug)]
pub struct ProcessorOptions {
    pub node: HostNodeId,
    pub sample_rate: f32,
    pub samples_per_buffer: usize,
    pub number_of_inputs: usize,
    pub number_of_outputs: usize,
    pub output_channel_count: Vec<usize>,
    /// Free-form options from the host, passed through untouched.
    pub processor_options: Value,
    port: Option<MessagePort>,
}

impl ProcessorOptions {
    pub(crate) fn new(
        node: HostNodeId,
        sample_rate: f32,
        samples_per_buffer: usize,
        bus: &crate::buffer::BusDescriptor,
        processor_options: Value,
        port: MessagePort,
    ) -> Self {
        Self {
            node,
            sample_rate,
            samples_per_buffer,
            number_of_inputs: bus.input.len(),
            number_of_outputs: bus.output.len(),
            output_channel_count: bus.output_channel_count(),
            processor_options,
            port: Some(port),
        }
    }

    /// Take the injected control port. Returns `None` on the second call.
    pub fn take_port(&mut self) -> Option<MessagePort> {
        self.port.take()
    }
}

/// A running audio unit.
///
/// `inputs[port][channel]` and `outputs[port][channel]` are one block of
/// samples each. Return `false` once the unit has nothing more to produce;
/// the worker does not act on it, the host may.
pub trait AudioWorkletProcessor: Send {
    fn process(
        &mut self,
        inputs: &[Vec<&[f32]>],
        outputs: &mut [Vec<&mut [f32]>],
        params: &ParameterValues,
    ) -> bool;

    /// The control port injected at construction. A unit that does not keep
    /// its port is rejected by the registry.
    fn port(&self) -> Option<&MessagePort>;
}

/// Object-safe processor definition stored by the registry.
pub trait ProcessorDefDyn: Send + Sync {
    fn parameter_descriptors(&self) -> Vec<ParameterDescriptor>;
    fn construct(&self, options: ProcessorOptions) -> Box<dyn AudioWorkletProcessor>;
}

/// Generic processor definition; implement this for your units.
pub trait ProcessorDef: Send + Sync + 'static {
    type Processor: AudioWorkletProcessor + 'static;

    fn parameter_descriptors(&self) -> Vec<ParameterDescriptor> {
        Vec::new()
    }

    fn construct(&self, options: ProcessorOptions) -> Self::Processor;
}

impl<T: ProcessorDef> ProcessorDefDyn for T {
    fn parameter_descriptors(&self) -> Vec<ParameterDescriptor> {
        <T as ProcessorDef>::parameter_descriptors(self)
    }

    fn construct(&self, options: ProcessorOptions) -> Box<dyn AudioWorkletProcessor> {
        Box::new(<T as ProcessorDef>::construct(self, options))
    }
}
