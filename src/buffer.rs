//! Shared sample storage and ping-pong block slicing.
//!
//! The host hands the worker one backing [`SampleBuffer`] per channel, sized
//! for `block_size * block_count` samples. [`build_slices`] carves that storage
//! into `block_count` independent slots. Each slot is a [`BufferSlice`] of
//! [`ChannelView`]s: ranges over the shared storage, never copies. Several
//! blocks can therefore be in flight at once, one per slot, while host and
//! worker only ever touch the same memory.
//!
//! Slot `i` covers `[i * block_size, (i + 1) * block_size)` of every channel.
//! Distinct slots never overlap and together tile `[0, block_size * block_count)`.

use crate::invariant_ppt::{assert_invariant, SLICE_DISJOINT, SLICE_EXACT_LENGTH, SLICE_NO_ALIAS};
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Backing storage for one channel, shared between host and worker.
///
/// Cloning a `SampleBuffer` shares the storage; it never copies samples.
#[derive(Clone, Default)]
pub struct SampleBuffer(Arc<Mutex<Vec<f32>>>);

impl SampleBuffer {
    /// Allocate `len` zeroed samples.
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0.0; len])
    }

    /// Take ownership of existing samples.
    pub fn from_vec(samples: Vec<f32>) -> Self {
        Self(Arc::new(Mutex::new(samples)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the whole buffer.
    pub fn with<R>(&self, f: impl FnOnce(&[f32]) -> R) -> R {
        f(self.lock().as_slice())
    }

    /// Run `f` over the whole buffer, mutably.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [f32]) -> R) -> R {
        f(self.lock().as_mut_slice())
    }

    /// Copy the whole buffer out (host-side convenience).
    pub fn to_vec(&self) -> Vec<f32> {
        self.lock().clone()
    }

    /// True when both handles share the same storage.
    pub fn ptr_eq(&self, other: &SampleBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Lock the storage. A poisoned lock still holds valid samples.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<f32>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SampleBuffer(len={})", self.len())
    }
}

/// Per-port, per-channel backing buffers: `ports[port][channel]`.
pub type BusBuffers = Vec<Vec<SampleBuffer>>;

/// The host's description of the storage behind a processor's buses.
#[derive(Debug, Clone, Default)]
pub struct BusDescriptor {
    /// Number of ping-pong slots carved from each backing buffer.
    pub buffer_count: usize,
    pub input: BusBuffers,
    pub output: BusBuffers,
}

impl BusDescriptor {
    /// Channel count of each output port, in port order.
    pub fn output_channel_count(&self) -> Vec<usize> {
        self.output.iter().map(Vec::len).collect()
    }
}

/// Which side of a bus a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSide {
    Input,
    Output,
}

impl fmt::Display for BusSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusSide::Input => write!(f, "input"),
            BusSide::Output => write!(f, "output"),
        }
    }
}

/// Errors building slices from a bus descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SliceError {
    #[error("block size must be non-zero")]
    ZeroBlockSize,

    #[error("{block_count} slots of {block_size} samples overflow the addressable range")]
    GeometryOverflow { block_size: usize, block_count: usize },

    #[error("{side} port {port} channel {channel} holds {len} samples, {required} required")]
    BufferTooShort {
        side: BusSide,
        port: usize,
        channel: usize,
        len: usize,
        required: usize,
    },

    #[error("{side} port {port} channel {channel} shares its backing buffer with another channel")]
    AliasedBuffer {
        side: BusSide,
        port: usize,
        channel: usize,
    },
}

/// A zero-copy window onto one channel's backing buffer.
#[derive(Debug, Clone)]
pub struct ChannelView {
    buffer: SampleBuffer,
    range: Range<usize>,
}

impl ChannelView {
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn start(&self) -> usize {
        self.range.start
    }

    pub fn end(&self) -> usize {
        self.range.end
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Copy the viewed samples out.
    pub fn to_vec(&self) -> Vec<f32> {
        self.buffer.lock()[self.range.clone()].to_vec()
    }

    /// Overwrite the viewed samples from `samples`; extra input is ignored.
    pub fn write(&self, samples: &[f32]) {
        let mut guard = self.buffer.lock();
        let target = &mut guard[self.range.clone()];
        let n = target.len().min(samples.len());
        target[..n].copy_from_slice(&samples[..n]);
    }

    /// Fill the viewed samples with `value`.
    pub fn fill(&self, value: f32) {
        self.buffer.lock()[self.range.clone()].fill(value);
    }
}

/// One side of a slot: `ports[port][channel]`.
#[derive(Debug, Clone, Default)]
pub struct Bus {
    pub ports: Vec<Vec<ChannelView>>,
}

impl Bus {
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn channel(&self, port: usize, channel: usize) -> Option<&ChannelView> {
        self.ports.get(port).and_then(|p| p.get(channel))
    }

    pub(crate) fn views(&self) -> impl Iterator<Item = &ChannelView> {
        self.ports.iter().flatten()
    }
}

/// One render block's worth of input and output views.
#[derive(Debug, Clone, Default)]
pub struct BufferSlice {
    pub input: Bus,
    pub output: Bus,
}

/// Carve `block_count` ping-pong slots of `block_size` samples out of the
/// descriptor's backing buffers.
pub fn build_slices(
    bus: &BusDescriptor,
    block_size: usize,
    block_count: usize,
) -> Result<Vec<BufferSlice>, SliceError> {
    if block_size == 0 {
        return Err(SliceError::ZeroBlockSize);
    }
    let required = block_size
        .checked_mul(block_count)
        .ok_or(SliceError::GeometryOverflow { block_size, block_count })?;
    validate_side(&bus.input, BusSide::Input, required)?;
    validate_side(&bus.output, BusSide::Output, required)?;
    check_aliasing(bus)?;

    // Every bound below is at most `required`, so none of it can overflow.
    let mut slices = Vec::with_capacity(block_count);
    for start in (0..required).step_by(block_size) {
        let range = start..start + block_size;
        slices.push(BufferSlice {
            input: slice_bus(&bus.input, &range),
            output: slice_bus(&bus.output, &range),
        });
    }

    let exact = slices
        .iter()
        .flat_map(|s| s.input.views().chain(s.output.views()))
        .all(|v| v.len() == block_size);
    assert_invariant(SLICE_EXACT_LENGTH, exact, "every view spans one block", Some("build_slices"));
    let disjoint = slices.windows(2).all(|pair| {
        match (first_range(&pair[0]), first_range(&pair[1])) {
            (Some(a), Some(b)) => a.end <= b.start,
            _ => true,
        }
    });
    assert_invariant(SLICE_DISJOINT, disjoint, "slots are ordered and disjoint", Some("build_slices"));
    let distinct = slices.first().map_or(true, |slot| {
        let views: Vec<&ChannelView> = slot.input.views().chain(slot.output.views()).collect();
        views
            .iter()
            .enumerate()
            .all(|(i, v)| views[..i].iter().all(|earlier| !earlier.buffer().ptr_eq(v.buffer())))
    });
    assert_invariant(SLICE_NO_ALIAS, distinct, "every view owns its storage", Some("build_slices"));

    Ok(slices)
}

fn slice_bus(buffers: &BusBuffers, range: &Range<usize>) -> Bus {
    let ports = buffers
        .iter()
        .map(|port| {
            port.iter()
                .map(|buffer| ChannelView {
                    buffer: buffer.clone(),
                    range: range.clone(),
                })
                .collect()
        })
        .collect();
    Bus { ports }
}

fn first_range(slice: &BufferSlice) -> Option<Range<usize>> {
    slice
        .input
        .views()
        .chain(slice.output.views())
        .next()
        .map(ChannelView::range)
}

fn validate_side(buffers: &BusBuffers, side: BusSide, required: usize) -> Result<(), SliceError> {
    for (port, channels) in buffers.iter().enumerate() {
        for (channel, buffer) in channels.iter().enumerate() {
            let len = buffer.len();
            if len < required {
                return Err(SliceError::BufferTooShort {
                    side,
                    port,
                    channel,
                    len,
                    required,
                });
            }
        }
    }
    Ok(())
}

fn check_aliasing(bus: &BusDescriptor) -> Result<(), SliceError> {
    let all: Vec<(BusSide, usize, usize, &SampleBuffer)> = bus
        .input
        .iter()
        .enumerate()
        .flat_map(|(p, chans)| chans.iter().enumerate().map(move |(c, b)| (BusSide::Input, p, c, b)))
        .chain(
            bus.output
                .iter()
                .enumerate()
                .flat_map(|(p, chans)| chans.iter().enumerate().map(move |(c, b)| (BusSide::Output, p, c, b))),
        )
        .collect();

    for (i, &(side, port, channel, buffer)) in all.iter().enumerate() {
        if all[..i].iter().any(|(_, _, _, earlier)| earlier.ptr_eq(buffer)) {
            return Err(SliceError::AliasedBuffer { side, port, channel });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_descriptor(len: usize, buffer_count: usize) -> BusDescriptor {
        BusDescriptor {
            buffer_count,
            input: vec![vec![SampleBuffer::zeroed(len)]],
            output: vec![vec![SampleBuffer::zeroed(len)]],
        }
    }

    #[test]
    fn two_slots_split_the_buffer() {
        let desc = mono_descriptor(256, 2);
        let slices = build_slices(&desc, 128, 2).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].input.ports[0][0].range(), 0..128);
        assert_eq!(slices[1].input.ports[0][0].range(), 128..256);
        assert_eq!(slices[0].output.ports[0][0].range(), 0..128);
        assert_eq!(slices[1].output.ports[0][0].range(), 128..256);
    }

    #[test]
    fn views_alias_backing_storage() {
        let desc = mono_descriptor(8, 2);
        let slices = build_slices(&desc, 4, 2).unwrap();
        slices[1].output.ports[0][0].fill(1.0);
        assert_eq!(desc.output[0][0].to_vec(), vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);

        desc.input[0][0].with_mut(|s| s[2] = 0.5);
        assert_eq!(slices[0].input.ports[0][0].to_vec(), vec![0.0, 0.0, 0.5, 0.0]);
    }

    #[test]
    fn zero_block_size_rejected() {
        let desc = mono_descriptor(8, 1);
        assert_eq!(build_slices(&desc, 0, 1).unwrap_err(), SliceError::ZeroBlockSize);
    }

    #[test]
    fn short_buffer_rejected() {
        let desc = mono_descriptor(100, 1);
        let err = build_slices(&desc, 128, 1).unwrap_err();
        assert_eq!(
            err,
            SliceError::BufferTooShort {
                side: BusSide::Input,
                port: 0,
                channel: 0,
                len: 100,
                required: 128,
            }
        );
    }

    #[test]
    fn aliased_output_rejected() {
        let shared = SampleBuffer::zeroed(64);
        let desc = BusDescriptor {
            buffer_count: 1,
            input: vec![vec![shared.clone()]],
            output: vec![vec![shared]],
        };
        let err = build_slices(&desc, 64, 1).unwrap_err();
        assert_eq!(
            err,
            SliceError::AliasedBuffer {
                side: BusSide::Output,
                port: 0,
                channel: 0
            }
        );
    }

    #[test]
    fn oversized_geometry_rejected() {
        let desc = BusDescriptor {
            buffer_count: 2,
            input: Vec::new(),
            output: Vec::new(),
        };
        let block_size = usize::MAX / 2 + 1;
        assert_eq!(
            build_slices(&desc, block_size, 2).unwrap_err(),
            SliceError::GeometryOverflow {
                block_size,
                block_count: 2
            }
        );
    }

    #[test]
    fn huge_block_fitting_exactly_slices_once() {
        let desc = BusDescriptor {
            buffer_count: 1,
            input: Vec::new(),
            output: Vec::new(),
        };
        let slices = build_slices(&desc, usize::MAX, 1).unwrap();
        assert_eq!(slices.len(), 1);
    }

    #[test]
    fn zero_slots_is_empty() {
        let desc = mono_descriptor(0, 0);
        assert!(build_slices(&desc, 128, 0).unwrap().is_empty());
    }

    #[test]
    fn generator_without_inputs() {
        let desc = BusDescriptor {
            buffer_count: 2,
            input: Vec::new(),
            output: vec![vec![SampleBuffer::zeroed(64), SampleBuffer::zeroed(64)]],
        };
        let slices = build_slices(&desc, 32, 2).unwrap();
        assert_eq!(slices[1].input.port_count(), 0);
        assert_eq!(slices[1].output.ports[0].len(), 2);
        assert_eq!(slices[1].output.channel(0, 1).unwrap().range(), 32..64);
    }
}
