//! Builder API for bus descriptors.
//!
//! Allocates one zeroed backing buffer per channel, sized for every ping-pong
//! slot, so the result always slices cleanly.

use crate::buffer::{BusDescriptor, SampleBuffer};

/// Describes the ports of a processor's buses before storage exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusLayout {
    samples_per_buffer: usize,
    buffer_count: usize,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

impl BusLayout {
    /// A layout with `buffer_count` slots of `samples_per_buffer` samples.
    pub fn new(samples_per_buffer: usize, buffer_count: usize) -> Self {
        Self {
            samples_per_buffer,
            buffer_count,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add an input port with `channels` channels.
    pub fn input(mut self, channels: usize) -> Self {
        self.inputs.push(channels);
        self
    }

    /// Add an output port with `channels` channels.
    pub fn output(mut self, channels: usize) -> Self {
        self.outputs.push(channels);
        self
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Samples each backing buffer must hold.
    pub fn backing_len(&self) -> usize {
        self.samples_per_buffer * self.buffer_count
    }

    /// Allocate the backing storage.
    pub fn build(&self) -> BusDescriptor {
        let len = self.backing_len();
        let alloc = |ports: &[usize]| -> Vec<Vec<SampleBuffer>> {
            ports
                .iter()
                .map(|&channels| (0..channels).map(|_| SampleBuffer::zeroed(len)).collect())
                .collect()
        };
        BusDescriptor {
            buffer_count: self.buffer_count,
            input: alloc(&self.inputs),
            output: alloc(&self.outputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::build_slices;

    #[test]
    fn build_allocates_every_channel() {
        let desc = BusLayout::new(128, 2).input(1).output(2).build();
        assert_eq!(desc.buffer_count, 2);
        assert_eq!(desc.input.len(), 1);
        assert_eq!(desc.output_channel_count(), vec![2]);
        assert!(desc.output[0].iter().all(|b| b.len() == 256));
    }

    #[test]
    fn channels_get_distinct_storage() {
        let desc = BusLayout::new(16, 1).input(2).output(2).build();
        assert!(!desc.input[0][0].ptr_eq(&desc.input[0][1]));
        assert!(build_slices(&desc, 16, 1).is_ok());
    }
}
