//! EntropyCoded backend: baseline JPEG frames decoded on the host.
//!
//! The encoded bytes are read into host memory, entropy-decoded and
//! colour-transformed by zune-jpeg, and expanded RGB -> RGBA straight into
//! the mapped staging buffer. Disk and decode stages are timed separately.

use std::path::Path;
use std::time::Instant;

use zune_jpeg::JpegDecoder;

use crate::codec::{read_frame, CodecBackend, CodecDescriptor};
use crate::error::LoadError;
use crate::gpu::{GpuContext, StagingBuffer};
use crate::stats::{Stage, TimingSample};

/// Decode `data` and write RGBA rows into `dst`, validating the declared
/// dimensions against the stream's.
pub fn decode_into(
    data: &[u8],
    width: u32,
    height: u32,
    dst: &mut [u8],
) -> Result<(), LoadError> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| LoadError::format(format!("jpeg decode: {e}")))?;
    let (w, h) = decoder
        .dimensions()
        .ok_or_else(|| LoadError::format("jpeg carries no dimensions"))?;
    if (w as u32, h as u32) != (width, height) {
        return Err(LoadError::format(format!(
            "frame is {w}x{h}, stream is {width}x{height}"
        )));
    }

    let count = w * h;
    match pixels.len() / count.max(1) {
        3 => {
            for (src, out) in pixels.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                out[0] = src[0];
                out[1] = src[1];
                out[2] = src[2];
                out[3] = 255;
            }
        }
        1 => {
            for (src, out) in pixels.iter().zip(dst.chunks_exact_mut(4)) {
                out[0] = *src;
                out[1] = *src;
                out[2] = *src;
                out[3] = 255;
            }
        }
        channels => {
            return Err(LoadError::format(format!(
                "unsupported jpeg channel count {channels}"
            )));
        }
    }
    Ok(())
}

pub struct EntropyCodedCodec {
    descriptor: CodecDescriptor,
}

impl EntropyCodedCodec {
    pub fn new(descriptor: CodecDescriptor) -> Self {
        Self { descriptor }
    }
}

impl CodecBackend for EntropyCodedCodec {
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
            decode_into(&data, self.descriptor.width, self.descriptor.height, dst)
        })?;
        let decode = TimingSample::new(Stage::Decode, started.elapsed(), frame_index);

        Ok(vec![disk, decode])
    }
}
