//! RawPixel backend: uncompressed 32-bpp BMP frames.
//!
//! The pixel block is copied straight from the file into the mapped staging
//! buffer; the only work besides the read is undoing BMP's bottom-up row
//! order. BMP stores BGRA, so the stream texture is BGRA too and no channel
//! swizzle ever happens.

use std::path::Path;

use crate::codec::{read_frame, CodecBackend, CodecDescriptor};
use crate::error::LoadError;
use crate::gpu::{GpuContext, StagingBuffer};
use crate::stats::TimingSample;

const FILE_HEADER_LEN: usize = 14;
const INFO_HEADER_LEN: usize = 40;

#[derive(Debug, PartialEq, Eq)]
pub struct BmpHeader {
    pub width: u32,
    pub height: u32,
    /// True when rows are stored bottom-up (positive biHeight).
    pub bottom_up: bool,
    pub data_offset: usize,
}

/// Parse and validate the BMP headers. Only the layout the offline packer
/// emits is accepted: 32 bpp, BI_RGB, single plane.
pub fn parse_bmp_header(data: &[u8]) -> Result<BmpHeader, LoadError> {
    if data.len() < FILE_HEADER_LEN + INFO_HEADER_LEN {
        return Err(LoadError::format("file shorter than BMP headers"));
    }
    if &data[0..2] != b"BM" {
        return Err(LoadError::format("missing BM magic"));
    }
    let u32_at = |off: usize| u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
    let data_offset = u32_at(10) as usize;
    let width = i32::from_le_bytes(data[18..22].try_into().unwrap());
    let height = i32::from_le_bytes(data[22..26].try_into().unwrap());
    let bpp = u16::from_le_bytes(data[28..30].try_into().unwrap());
    let compression = u32_at(30);

    if bpp != 32 {
        return Err(LoadError::format(format!("{bpp} bpp, expected 32")));
    }
    if compression != 0 {
        return Err(LoadError::format("compressed BMP not supported"));
    }
    if width <= 0 || height == 0 {
        return Err(LoadError::format("degenerate BMP dimensions"));
    }

    Ok(BmpHeader {
        width: width as u32,
        height: height.unsigned_abs(),
        bottom_up: height > 0,
        data_offset,
    })
}

/// Copy the pixel block into `dst` in top-down order.
pub fn blit_pixels(data: &[u8], header: &BmpHeader, dst: &mut [u8]) -> Result<(), LoadError> {
    let stride = header.width as usize * 4;
    let rows = header.height as usize;
    let needed = header.data_offset + stride * rows;
    if data.len() < needed {
        return Err(LoadError::format(format!(
            "pixel block truncated: {} bytes, need {needed}",
            data.len()
        )));
    }
    let pixels = &data[header.data_offset..needed];
    for row in 0..rows {
        let src_row = if header.bottom_up { rows - 1 - row } else { row };
        dst[row * stride..(row + 1) * stride]
            .copy_from_slice(&pixels[src_row * stride..(src_row + 1) * stride]);
    }
    Ok(())
}

pub struct RawPixelCodec {
    descriptor: CodecDescriptor,
}

impl RawPixelCodec {
    pub fn new(descriptor: CodecDescriptor) -> Self {
        Self { descriptor }
    }
}

impl CodecBackend for RawPixelCodec {
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
        let header = parse_bmp_header(&data)?;
        if (header.width, header.height) != (self.descriptor.width, self.descriptor.height) {
            return Err(LoadError::format(format!(
                "frame is {}x{}, stream is {}x{}",
                header.width, header.height, self.descriptor.width, self.descriptor.height
            )));
        }
        staging.write_with(&gpu.device, |dst| blit_pixels(&data, &header, dst))?;
        Ok(vec![disk])
    }
}
