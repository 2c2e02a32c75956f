//! ContainerCompressed backend: texture-info container around one BC1 mip.
//!
//! Layout (little-endian): 4-byte magic `CTEX`, u8 version, u8 format tag,
//! u16 width, u16 height, then the mip level's block data. Block pitch is
//! derived from the declared width, and the level is unpacked into the
//! staging buffer one block row at a time through a streaming context, so a
//! short payload surfaces as a per-row format error rather than a blind
//! copy.

use std::path::Path;
use std::time::Instant;

use crate::codec::{read_frame, CodecBackend, CodecDescriptor};
use crate::error::LoadError;
use crate::gpu::{GpuContext, StagingBuffer};
use crate::stats::{Stage, TimingSample};

pub const MAGIC: [u8; 4] = *b"CTEX";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 10;

/// Block formats a container may declare. Only BC1 ships today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Bc1 = 0,
}

impl ContainerFormat {
    pub fn bytes_per_block(self) -> usize {
        match self {
            ContainerFormat::Bc1 => 8,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, LoadError> {
        match tag {
            0 => Ok(ContainerFormat::Bc1),
            other => Err(LoadError::format(format!(
                "unknown container format tag {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub format: ContainerFormat,
    pub width: u32,
    pub height: u32,
}

impl TextureInfo {
    /// Bytes per row of 4x4 blocks: `ceil(width/4) * bytesPerBlock`.
    pub fn block_pitch(&self) -> usize {
        (self.width as usize).div_ceil(4) * self.format.bytes_per_block()
    }

    pub fn block_rows(&self) -> usize {
        (self.height as usize).div_ceil(4)
    }
}

/// Read the texture-info header. Failure is fatal for the frame only.
pub fn texture_info(data: &[u8]) -> Result<TextureInfo, LoadError> {
    if data.len() < HEADER_LEN {
        return Err(LoadError::format("file shorter than container header"));
    }
    if data[0..4] != MAGIC {
        return Err(LoadError::format("bad container magic"));
    }
    if data[4] != VERSION {
        return Err(LoadError::format(format!(
            "container version {} unsupported",
            data[4]
        )));
    }
    let format = ContainerFormat::from_tag(data[5])?;
    let width = u16::from_le_bytes(data[6..8].try_into().unwrap()) as u32;
    let height = u16::from_le_bytes(data[8..10].try_into().unwrap()) as u32;
    if width == 0 || height == 0 {
        return Err(LoadError::format("container declares empty texture"));
    }
    Ok(TextureInfo {
        format,
        width,
        height,
    })
}

/// Streaming unpack of one mip level: hands out block rows until the level
/// is exhausted, refusing to run past the payload.
pub struct UnpackContext<'a> {
    payload: &'a [u8],
    info: TextureInfo,
    next_row: usize,
}

impl<'a> UnpackContext<'a> {
    pub fn begin(data: &'a [u8]) -> Result<Self, LoadError> {
        let info = texture_info(data)?;
        Ok(Self {
            payload: &data[HEADER_LEN..],
            info,
            next_row: 0,
        })
    }

    pub fn info(&self) -> TextureInfo {
        self.info
    }

    /// Next block row, or `None` once the level is fully unpacked.
    pub fn next_block_row(&mut self) -> Result<Option<&'a [u8]>, LoadError> {
        if self.next_row == self.info.block_rows() {
            return Ok(None);
        }
        let pitch = self.info.block_pitch();
        let start = self.next_row * pitch;
        let end = start + pitch;
        if end > self.payload.len() {
            return Err(LoadError::format(format!(
                "mip level truncated at block row {}",
                self.next_row
            )));
        }
        self.next_row += 1;
        Ok(Some(&self.payload[start..end]))
    }
}

/// Unpack the whole level into `dst`, returning the declared info.
pub fn unpack_level(data: &[u8], dst: &mut [u8]) -> Result<TextureInfo, LoadError> {
    let mut ctx = UnpackContext::begin(data)?;
    let pitch = ctx.info().block_pitch();
    let mut offset = 0;
    while let Some(row) = ctx.next_block_row()? {
        dst[offset..offset + pitch].copy_from_slice(row);
        offset += pitch;
    }
    Ok(ctx.info())
}

/// Pack one BC1 level into a container. Used by the asset packer and tests.
pub fn encode_container(info: TextureInfo, blocks: &[u8]) -> Result<Vec<u8>, LoadError> {
    let expected = info.block_pitch() * info.block_rows();
    if blocks.len() != expected {
        return Err(LoadError::format(format!(
            "{} block bytes for a {}x{} level, expected {expected}",
            blocks.len(),
            info.width,
            info.height
        )));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + blocks.len());
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(info.format as u8);
    out.extend_from_slice(&(info.width as u16).to_le_bytes());
    out.extend_from_slice(&(info.height as u16).to_le_bytes());
    out.extend_from_slice(blocks);
    Ok(out)
}

pub struct ContainerCodec {
    descriptor: CodecDescriptor,
}

impl ContainerCodec {
    pub fn new(descriptor: CodecDescriptor) -> Self {
        Self { descriptor }
    }
}

impl CodecBackend for ContainerCodec {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn load(
        &mut self,
        gpu: &GpuContext,
        path: &Path,
        frame_index: usize,
        staging: &mut StagingBuffer,
    ) -> Result<Vec<TimingSample>, LoadError> {
        let (data, disk) = read_frame(path, frame_index)?;

        let started = Instant::now();
        staging.write_with(&gpu.device, |dst| {
            let info = unpack_level(&data, dst)?;
            if (info.width, info.height) != (self.descriptor.width, self.descriptor.height) {
                return Err(LoadError::format(format!(
                    "container declares {}x{}, stream is {}x{}",
                    info.width, info.height, self.descriptor.width, self.descriptor.height
                )));
            }
            Ok(())
        })?;
        let decode = TimingSample::new(Stage::Decode, started.elapsed(), frame_index);

        Ok(vec![disk, decode])
    }
}
