//! DeviceDecoded backend: GTC frames decoded by a compute kernel.
//!
//! A `.gtc` frame is a fixed header plus four compressed planes: one
//! base-luma byte and two chroma bytes per 4x4 block, a global 4-entry
//! luma-delta palette, and 2 index bits per pixel. The host never touches
//! the pixels: the payload is transferred to a device buffer, then a kernel
//! reconstructs RGBA8 directly into the (storage-usage) staging buffer the
//! uploader will commit. Transfer and kernel are timed as separate stages,
//! each ending in an explicit blocking wait.

use std::path::Path;
use std::time::Instant;

use tracing::instrument;

use crate::codec::{read_frame, CodecBackend, CodecDescriptor};
use crate::error::LoadError;
use crate::gpu::timer::GpuTimer;
use crate::gpu::{GpuContext, StagingBuffer};
use crate::stats::{Stage, TimingSample};

pub const MAGIC: [u8; 4] = *b"GTC1";
pub const HEADER_LEN: usize = 24;
pub const PALETTE_LEN: usize = 4;

/// Declared geometry and plane sizes of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtcHeader {
    pub width: u32,
    pub height: u32,
    pub luma_len: u32,
    pub chroma_len: u32,
    pub palette_len: u32,
    pub index_len: u32,
}

impl GtcHeader {
    /// Header for a frame of the given resolution with the fixed plane
    /// layout the packer emits.
    pub fn for_resolution(width: u32, height: u32) -> Self {
        let blocks = width / 4 * (height / 4);
        Self {
            width,
            height,
            luma_len: blocks,
            chroma_len: blocks * 2,
            palette_len: PALETTE_LEN as u32,
            index_len: width * height / 4,
        }
    }

    pub fn payload_len(&self) -> usize {
        (self.luma_len + self.chroma_len + self.palette_len + self.index_len) as usize
    }

    /// Byte offsets of the planes within the payload, in declaration order.
    pub fn plane_offsets(&self) -> [u32; 4] {
        let luma = 0;
        let chroma = luma + self.luma_len;
        let palette = chroma + self.chroma_len;
        let index = palette + self.palette_len;
        [luma, chroma, palette, index]
    }

    /// The plane sizes a well-formed frame must declare for its resolution.
    fn validate(&self) -> Result<(), LoadError> {
        let expected = GtcHeader::for_resolution(self.width, self.height);
        if *self != expected {
            return Err(LoadError::format(format!(
                "plane sizes {:?} inconsistent with {}x{}",
                (
                    self.luma_len,
                    self.chroma_len,
                    self.palette_len,
                    self.index_len
                ),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Parse and validate the frame header plus total payload length.
pub fn parse_header(data: &[u8]) -> Result<GtcHeader, LoadError> {
    if data.len() < HEADER_LEN {
        return Err(LoadError::format("file shorter than gtc header"));
    }
    if data[0..4] != MAGIC {
        return Err(LoadError::format("bad gtc magic"));
    }
    let u16_at = |off: usize| u16::from_le_bytes(data[off..off + 2].try_into().unwrap()) as u32;
    let u32_at = |off: usize| u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
    let header = GtcHeader {
        width: u16_at(4),
        height: u16_at(6),
        luma_len: u32_at(8),
        chroma_len: u32_at(12),
        palette_len: u32_at(16),
        index_len: u32_at(20),
    };
    if header.width == 0 || header.width % 4 != 0 || header.height == 0 || header.height % 4 != 0 {
        return Err(LoadError::format("gtc dimensions must be multiples of 4"));
    }
    header.validate()?;
    if data.len() - HEADER_LEN != header.payload_len() {
        return Err(LoadError::format(format!(
            "payload is {} bytes, header declares {}",
            data.len() - HEADER_LEN,
            header.payload_len()
        )));
    }
    Ok(header)
}

/// Pack an RGBA image into a GTC frame. Used by the asset packer and tests.
pub fn encode_gtc(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>, LoadError> {
    if width == 0 || width % 4 != 0 || height == 0 || height % 4 != 0 {
        return Err(LoadError::format("gtc dimensions must be multiples of 4"));
    }
    if rgba.len() != (width * height * 4) as usize {
        return Err(LoadError::format("rgba length does not match dimensions"));
    }
    let header = GtcHeader::for_resolution(width, height);
    let palette: [u8; PALETTE_LEN] = [128 - 24, 128 - 8, 128 + 8, 128 + 24];

    let luma_of = |x: u32, y: u32| {
        let p = ((y * width + x) * 4) as usize;
        0.299 * rgba[p] as f32 + 0.587 * rgba[p + 1] as f32 + 0.114 * rgba[p + 2] as f32
    };

    let blocks_x = width / 4;
    let blocks_y = height / 4;
    let mut luma_plane = Vec::with_capacity((blocks_x * blocks_y) as usize);
    let mut chroma_plane = Vec::with_capacity((blocks_x * blocks_y * 2) as usize);
    let mut index_plane = vec![0u8; (width * height / 4) as usize];

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let mut y_sum = 0.0f32;
            let mut cb_sum = 0.0f32;
            let mut cr_sum = 0.0f32;
            for dy in 0..4 {
                for dx in 0..4 {
                    let (x, y) = (bx * 4 + dx, by * 4 + dy);
                    let p = ((y * width + x) * 4) as usize;
                    let (r, g, b) = (rgba[p] as f32, rgba[p + 1] as f32, rgba[p + 2] as f32);
                    let luma = 0.299 * r + 0.587 * g + 0.114 * b;
                    y_sum += luma;
                    cb_sum += (b - luma) / 1.772;
                    cr_sum += (r - luma) / 1.402;
                }
            }
            let base = (y_sum / 16.0).clamp(0.0, 255.0);
            luma_plane.push(base as u8);
            chroma_plane.push((cb_sum / 16.0 + 128.0).clamp(0.0, 255.0) as u8);
            chroma_plane.push((cr_sum / 16.0 + 128.0).clamp(0.0, 255.0) as u8);

            for dy in 0..4 {
                for dx in 0..4 {
                    let (x, y) = (bx * 4 + dx, by * 4 + dy);
                    let target = luma_of(x, y);
                    let index = palette
                        .iter()
                        .enumerate()
                        .min_by(|(_, &a), (_, &b)| {
                            let da = (target - (base as f32 + a as f32 - 128.0)).abs();
                            let db = (target - (base as f32 + b as f32 - 128.0)).abs();
                            da.total_cmp(&db)
                        })
                        .map(|(i, _)| i as u8)
                        .unwrap_or(0);
                    let pixel = (y * width + x) as usize;
                    index_plane[pixel / 4] |= index << ((pixel % 4) * 2);
                }
            }
        }
    }

    let mut out = Vec::with_capacity(HEADER_LEN + header.payload_len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(width as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());
    for len in [
        header.luma_len,
        header.chroma_len,
        header.palette_len,
        header.index_len,
    ] {
        out.extend_from_slice(&len.to_le_bytes());
    }
    out.extend_from_slice(&luma_plane);
    out.extend_from_slice(&chroma_plane);
    out.extend_from_slice(&palette);
    out.extend_from_slice(&index_plane);
    Ok(out)
}

pub struct DeviceDecodedCodec {
    descriptor: CodecDescriptor,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    payload_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    timer: GpuTimer,
}

impl DeviceDecodedCodec {
    pub fn new(gpu: &GpuContext, descriptor: CodecDescriptor) -> Self {
        let shader = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("gtc decode kernel"),
                source: wgpu::ShaderSource::Wgsl(include_str!("gtc_decode.wgsl").into()),
            });

        let layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("gtc decode bindings"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("gtc decode layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("gtc decode"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("decode_frame"),
                compilation_options: Default::default(),
                cache: None,
            });

        let capacity = GtcHeader::for_resolution(descriptor.width, descriptor.height)
            .payload_len()
            .next_multiple_of(4) as u64;
        let payload_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gtc payload"),
            size: capacity,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gtc params"),
            size: 32,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            descriptor,
            pipeline,
            layout,
            payload_buffer,
            params_buffer,
            timer: GpuTimer::new(gpu, false),
        }
    }

    /// Move header-stripped payload and kernel params into device memory,
    /// flushed and waited so the copy is fully accounted to this stage.
    fn transfer(&self, gpu: &GpuContext, header: &GtcHeader, payload: &[u8]) {
        // write_buffer wants 4-byte-aligned sizes.
        let mut padded = payload.to_vec();
        padded.resize(padded.len().next_multiple_of(4), 0);
        gpu.queue.write_buffer(&self.payload_buffer, 0, &padded);

        let offsets = header.plane_offsets();
        let params: [u32; 8] = [
            header.width,
            header.height,
            offsets[0],
            offsets[1],
            offsets[2],
            offsets[3],
            0,
            0,
        ];
        let mut bytes = [0u8; 32];
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(params) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        gpu.queue.write_buffer(&self.params_buffer, 0, &bytes);

        gpu.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        gpu.device.poll(wgpu::Maintain::Wait);
    }

    /// Acquire the staging buffer for kernel output, dispatch the decode,
    /// flush the queue and block until completion.
    fn dispatch(
        &self,
        gpu: &GpuContext,
        staging: &StagingBuffer,
    ) -> Result<std::time::Duration, LoadError> {
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gtc decode frame"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.payload_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: staging.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        });

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gtc decode"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("gtc decode pass"),
                timestamp_writes: self.timer.pass_writes(),
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                self.descriptor.width.div_ceil(8),
                self.descriptor.height.div_ceil(8),
                1,
            );
        }
        self.timer.resolve(&mut encoder);

        let started = Instant::now();
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let duration = match self.timer.block_on_elapsed(&gpu.device)? {
            Some(kernel_time) => kernel_time,
            None => {
                gpu.device.poll(wgpu::Maintain::Wait);
                started.elapsed()
            }
        };

        if let Some(error) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(LoadError::device(format!("decode kernel: {error}")));
        }
        Ok(duration)
    }
}

impl CodecBackend for DeviceDecodedCodec {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    #[instrument(skip_all, fields(frame = frame_index))]
    fn load(
        &mut self,
        gpu: &GpuContext,
        path: &Path,
        frame_index: usize,
        staging: &mut StagingBuffer,
    ) -> Result<Vec<TimingSample>, LoadError> {
        let (data, disk) = read_frame(path, frame_index)?;
        let header = parse_header(&data)?;
        if (header.width, header.height) != (self.descriptor.width, self.descriptor.height) {
            return Err(LoadError::format(format!(
                "frame is {}x{}, stream is {}x{}",
                header.width, header.height, self.descriptor.width, self.descriptor.height
            )));
        }

        let started = Instant::now();
        self.transfer(gpu, &header, &data[HEADER_LEN..]);
        let transfer = TimingSample::new(Stage::DeviceTransfer, started.elapsed(), frame_index);

        let kernel_time = self.dispatch(gpu, staging)?;
        staging.mark_pending();
        let decode = TimingSample::new(Stage::DeviceDecode, kernel_time, frame_index);

        Ok(vec![disk, transfer, decode])
    }
}
