//! Persistent stream texture and the staged commit into it.

use std::time::Instant;

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::error::LoadError;
use crate::gpu::staging::{BufferState, StagingBuffer};
use crate::gpu::timer::GpuTimer;
use crate::gpu::GpuContext;
use crate::stats::{Stage, TimingSample};

/// Owns the single GPU texture the stream renders from and commits filled
/// staging buffers into it, timing each transfer on the device when
/// timestamp queries are available.
pub struct TextureUploader {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    extent: wgpu::Extent3d,
    bytes_per_row: u32,
    block_rows: u32,
    timer: GpuTimer,
}

impl TextureUploader {
    pub fn new(
        gpu: &GpuContext,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let (block_w, block_h) = format.block_dimensions();
        if width % block_w != 0 || height % block_h != 0 {
            return Err(eyre!(
                "{width}x{height} is not a multiple of the {block_w}x{block_h} block size"
            ));
        }
        let block_bytes = format
            .block_copy_size(None)
            .ok_or_else(|| eyre!("{format:?} has no defined copy size"))?;
        let bytes_per_row = (width / block_w) * block_bytes;
        // Buffer-to-texture copies demand 256-byte row pitch; panoramic
        // streams are wide enough that padding was never worth carrying.
        if bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
            return Err(eyre!(
                "row pitch {bytes_per_row} not {}-byte aligned; pick a wider frame",
                wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
            ));
        }

        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("stream texture"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            // COPY_SRC so snapshots/readbacks of the presented frame work.
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let timer = GpuTimer::new(gpu, true);
        info!(
            ?format,
            width,
            height,
            gpu_timed = timer.enabled(),
            "stream texture allocated"
        );

        Ok(Self {
            texture,
            view,
            extent,
            bytes_per_row,
            block_rows: height / block_h,
            timer,
        })
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Bound, ready-to-sample view of the current frame.
    pub fn texture_view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Sub-region transfer of a filled staging buffer into the texture.
    ///
    /// Blocks until the device-side copy is measurable: either the
    /// timestamp-query readback or, without query support, a full
    /// `Maintain::Wait` bracketed by a wall clock.
    pub fn commit(
        &mut self,
        gpu: &GpuContext,
        staging: &mut StagingBuffer,
        frame_index: usize,
    ) -> Result<TimingSample, LoadError> {
        debug_assert_eq!(staging.state(), BufferState::PendingUpload);

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame upload"),
            });

        self.timer.encoder_start(&mut encoder);
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: staging.raw(),
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.bytes_per_row),
                    rows_per_image: Some(self.block_rows),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            self.extent,
        );
        self.timer.encoder_end(&mut encoder);
        self.timer.resolve(&mut encoder);

        let started = Instant::now();
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let duration = match self.timer.block_on_elapsed(&gpu.device)? {
            Some(gpu_time) => gpu_time,
            None => {
                gpu.device.poll(wgpu::Maintain::Wait);
                started.elapsed()
            }
        };

        staging.release();
        Ok(TimingSample::new(Stage::Upload, duration, frame_index))
    }
}
