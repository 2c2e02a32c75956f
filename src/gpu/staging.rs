//! Staging buffers: host-writable (or kernel-writable), device-visible
//! memory reused for every frame of a session.
//!
//! The pool owns one buffer (serial) or two in a ring (pipelined). With two
//! buffers the CPU can fill buffer B while the device may still be reading
//! buffer A from the previous commit; any real overlap beyond that is up to
//! the device's own command scheduling, not an explicit fence.

use serde::{Deserialize, Serialize};

use crate::codec::DecodeLocus;
use crate::error::LoadError;
use crate::gpu::{map_blocking, GpuContext};

/// How many staging buffers the session cycles through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferingMode {
    /// One buffer; decode of frame K+1 reuses the region frame K uploaded
    /// from.
    Serial,
    /// Two buffers in a ring; decode and upload can overlap.
    Pipelined,
}

impl BufferingMode {
    fn buffer_count(self) -> usize {
        match self {
            BufferingMode::Serial => 1,
            BufferingMode::Pipelined => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    MappedForWrite,
    PendingUpload,
}

/// One GPU-visible transfer region, sized to the codec's decoded payload.
/// State transitions happen only on the render thread.
pub struct StagingBuffer {
    buffer: wgpu::Buffer,
    size: u64,
    state: BufferState,
}

impl StagingBuffer {
    fn new(gpu: &GpuContext, size: u64, locus: DecodeLocus, index: usize) -> Self {
        // MAP_WRITE may only pair with COPY_SRC, so the device-decode path
        // gets a storage buffer the kernel writes instead of the host.
        let usage = match locus {
            DecodeLocus::Host => wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            DecodeLocus::Device => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        };
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("staging buffer {index}")),
            size,
            usage,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            size,
            state: BufferState::Free,
        }
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Scoped map/fill/unmap for host-decoded codecs. The buffer is mapped
    /// for exclusive host write, filled by `fill`, and unmapped before any
    /// device read is issued. A failed fill returns the buffer to `Free`.
    pub fn write_with<R>(
        &mut self,
        device: &wgpu::Device,
        fill: impl FnOnce(&mut [u8]) -> Result<R, LoadError>,
    ) -> Result<R, LoadError> {
        debug_assert_eq!(self.state, BufferState::Free, "staging buffer busy");
        let slice = self.buffer.slice(..);
        map_blocking(device, slice, wgpu::MapMode::Write)?;
        self.state = BufferState::MappedForWrite;

        let result = fill(&mut slice.get_mapped_range_mut());

        self.buffer.unmap();
        self.state = match result {
            Ok(_) => BufferState::PendingUpload,
            Err(_) => BufferState::Free,
        };
        result
    }

    /// Device-decode path: the compute kernel has populated the buffer.
    pub fn mark_pending(&mut self) {
        debug_assert_eq!(self.state, BufferState::Free, "staging buffer busy");
        self.state = BufferState::PendingUpload;
    }

    /// The upload consumed the contents; the region is reusable.
    pub fn release(&mut self) {
        self.state = BufferState::Free;
    }
}

/// Ring of one or two staging buffers, allocated once per session.
pub struct StagingBufferPool {
    buffers: Vec<StagingBuffer>,
    cursor: usize,
}

impl StagingBufferPool {
    pub fn new(gpu: &GpuContext, size: u64, mode: BufferingMode, locus: DecodeLocus) -> Self {
        let buffers = (0..mode.buffer_count())
            .map(|i| StagingBuffer::new(gpu, size, locus, i))
            .collect();
        Self { buffers, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Hand out the next buffer in the ring. A buffer left pending by an
    /// aborted frame is recycled; its contents were never committed.
    pub fn acquire(&mut self) -> &mut StagingBuffer {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.buffers.len();
        let buffer = &mut self.buffers[index];
        if buffer.state != BufferState::Free {
            buffer.release();
        }
        buffer
    }
}
