//! Pluggable codec backends sharing one load contract.
//!
//! Each backend reads one compressed frame file and leaves the decoded
//! payload in a caller-supplied staging buffer, reporting a timing sample
//! per pipeline stage it ran. The variant is selected once per session from
//! configuration, never per frame.

pub mod block;
pub mod container;
pub mod device;
pub mod entropy;
pub mod raw;

use std::path::Path;
use std::time::Instant;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::gpu::{GpuContext, StagingBuffer};
use crate::stats::{Stage, TimingSample};

/// The five mutually-exclusive decode strategies under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// Uncompressed 32-bpp BMP, copied straight into the staging buffer.
    RawPixel,
    /// Headerless BC1 block stream; no CPU decode, compressed upload.
    CompressedBlock,
    /// Baseline JPEG; entropy + colour decode on the host.
    EntropyCoded,
    /// Texture-info container around one BC1 mip level, unpacked on the host.
    ContainerCompressed,
    /// Multi-plane payload decoded by a compute kernel on the device.
    DeviceDecoded,
}

impl CodecKind {
    pub const ALL: [CodecKind; 5] = [
        CodecKind::RawPixel,
        CodecKind::CompressedBlock,
        CodecKind::EntropyCoded,
        CodecKind::ContainerCompressed,
        CodecKind::DeviceDecoded,
    ];

    /// One file extension per codec.
    pub fn extension(self) -> &'static str {
        match self {
            CodecKind::RawPixel => ".bmp",
            CodecKind::CompressedBlock => ".dxt1",
            CodecKind::EntropyCoded => ".jpg",
            CodecKind::ContainerCompressed => ".crn",
            CodecKind::DeviceDecoded => ".gtc",
        }
    }
}

/// Where the decode work for a codec runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeLocus {
    Host,
    Device,
}

/// Session-lifetime description of the active codec: resolution, decode
/// locus, target texture format, and the staging payload size.
#[derive(Debug, Clone)]
pub struct CodecDescriptor {
    pub kind: CodecKind,
    pub width: u32,
    pub height: u32,
    pub locus: DecodeLocus,
    pub texture_format: wgpu::TextureFormat,
    pub staging_size: u64,
}

impl CodecDescriptor {
    pub fn new(kind: CodecKind, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || width % 4 != 0 || height % 4 != 0 {
            return Err(eyre!(
                "frame resolution {width}x{height} must be a positive multiple of 4"
            ));
        }
        let pixels = width as u64 * height as u64;
        let (locus, texture_format, staging_size) = match kind {
            CodecKind::RawPixel => (
                DecodeLocus::Host,
                wgpu::TextureFormat::Bgra8UnormSrgb,
                pixels * 4,
            ),
            CodecKind::CompressedBlock => (
                DecodeLocus::Host,
                wgpu::TextureFormat::Bc1RgbaUnormSrgb,
                pixels / 2,
            ),
            CodecKind::EntropyCoded => (
                DecodeLocus::Host,
                wgpu::TextureFormat::Rgba8UnormSrgb,
                pixels * 4,
            ),
            CodecKind::ContainerCompressed => (
                DecodeLocus::Host,
                wgpu::TextureFormat::Bc1RgbaUnormSrgb,
                pixels / 2,
            ),
            CodecKind::DeviceDecoded => (
                DecodeLocus::Device,
                wgpu::TextureFormat::Rgba8Unorm,
                pixels * 4,
            ),
        };
        Ok(Self {
            kind,
            width,
            height,
            locus,
            texture_format,
            staging_size,
        })
    }
}

/// Decode one frame into a staging buffer.
///
/// Backends run their own stages (disk read, host decode, device transfer,
/// device decode) and report one sample per stage. The upload itself is the
/// uploader's business.
pub trait CodecBackend {
    fn descriptor(&self) -> &CodecDescriptor;

    fn load(
        &mut self,
        gpu: &GpuContext,
        path: &Path,
        frame_index: usize,
        staging: &mut StagingBuffer,
    ) -> Result<Vec<TimingSample>, LoadError>;
}

/// Build the backend for the configured codec.
pub fn create_backend(
    gpu: &GpuContext,
    descriptor: CodecDescriptor,
) -> Result<Box<dyn CodecBackend>> {
    if descriptor.texture_format == wgpu::TextureFormat::Bc1RgbaUnormSrgb
        && !gpu.block_compression()
    {
        return Err(eyre!(
            "{:?} needs BC texture compression, which this adapter lacks",
            descriptor.kind
        ));
    }
    Ok(match descriptor.kind {
        CodecKind::RawPixel => Box::new(raw::RawPixelCodec::new(descriptor)),
        CodecKind::CompressedBlock => Box::new(block::CompressedBlockCodec::new(descriptor)),
        CodecKind::EntropyCoded => Box::new(entropy::EntropyCodedCodec::new(descriptor)),
        CodecKind::ContainerCompressed => Box::new(container::ContainerCodec::new(descriptor)),
        CodecKind::DeviceDecoded => Box::new(device::DeviceDecodedCodec::new(gpu, descriptor)),
    })
}

/// Read a whole frame file, timing the disk stage.
pub(crate) fn read_frame(
    path: &Path,
    frame_index: usize,
) -> Result<(Bytes, TimingSample), LoadError> {
    let started = Instant::now();
    let data = Bytes::from(std::fs::read(path)?);
    let sample = TimingSample::new(Stage::DiskRead, started.elapsed(), frame_index);
    Ok((data, sample))
}
