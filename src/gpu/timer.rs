//! Device-side duration measurement via timestamp queries.
//!
//! Two query slots (start/end) are resolved into a buffer after the timed
//! work and read back through one blocking map. Adapters without timestamp
//! support get a disabled timer; callers then fall back to bracketing the
//! submit + wait with a wall clock.

use std::time::Duration;

use crate::error::LoadError;
use crate::gpu::{map_blocking, GpuContext};

struct QueryPlumbing {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    /// Nanoseconds per timestamp tick, from the queue.
    period: f32,
}

pub struct GpuTimer {
    plumbing: Option<QueryPlumbing>,
}

impl GpuTimer {
    /// `encoder_level` timers need the inside-encoder feature on top of
    /// plain timestamp queries; pass-level timers only need the latter.
    pub fn new(gpu: &GpuContext, encoder_level: bool) -> Self {
        let supported = if encoder_level {
            gpu.encoder_timestamps()
        } else {
            gpu.pass_timestamps()
        };
        if !supported {
            return Self { plumbing: None };
        }

        let query_set = gpu.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("stage timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: 16,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp readback"),
            size: 16,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            plumbing: Some(QueryPlumbing {
                query_set,
                resolve,
                readback,
                period: gpu.queue.get_timestamp_period(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.plumbing.is_some()
    }

    /// Timestamp before the timed encoder work.
    pub fn encoder_start(&self, encoder: &mut wgpu::CommandEncoder) {
        if let Some(p) = &self.plumbing {
            encoder.write_timestamp(&p.query_set, 0);
        }
    }

    /// Timestamp after the timed encoder work.
    pub fn encoder_end(&self, encoder: &mut wgpu::CommandEncoder) {
        if let Some(p) = &self.plumbing {
            encoder.write_timestamp(&p.query_set, 1);
        }
    }

    /// Begin/end writes for a compute pass.
    pub fn pass_writes(&self) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        self.plumbing
            .as_ref()
            .map(|p| wgpu::ComputePassTimestampWrites {
                query_set: &p.query_set,
                beginning_of_pass_write_index: Some(0),
                end_of_pass_write_index: Some(1),
            })
    }

    /// Queue the query resolve + copy into the readback buffer. Must run in
    /// the same encoder, after the timed work.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        if let Some(p) = &self.plumbing {
            encoder.resolve_query_set(&p.query_set, 0..2, &p.resolve, 0);
            encoder.copy_buffer_to_buffer(&p.resolve, 0, &p.readback, 0, 16);
        }
    }

    /// Block until the submitted queries are readable and return the
    /// measured span. `None` when the timer is disabled.
    pub fn block_on_elapsed(&self, device: &wgpu::Device) -> Result<Option<Duration>, LoadError> {
        let Some(p) = &self.plumbing else {
            return Ok(None);
        };

        let slice = p.readback.slice(..);
        map_blocking(device, slice, wgpu::MapMode::Read)?;
        let stamps: [u64; 2] = {
            let view = slice.get_mapped_range();
            [
                u64::from_le_bytes(view[0..8].try_into().unwrap()),
                u64::from_le_bytes(view[8..16].try_into().unwrap()),
            ]
        };
        p.readback.unmap();

        let ticks = stamps[1].saturating_sub(stamps[0]);
        let nanos = (ticks as f64 * p.period as f64) as u64;
        Ok(Some(Duration::from_nanos(nanos)))
    }
}
