//! CompressedBlock backend: headerless BC1 (DXT1) block streams.
//!
//! Fixed 8:1 ratio against RGBA means the file is exactly
//! `width * height / 2` bytes of consecutive 4x4 blocks with no per-frame
//! metadata. Nothing decodes on the host; the format change happens at
//! upload time when the buffer lands in a BC1 texture.

use std::path::Path;

use crate::codec::{read_frame, CodecBackend, CodecDescriptor};
use crate::error::LoadError;
use crate::gpu::{GpuContext, StagingBuffer};
use crate::stats::TimingSample;

/// Expected byte length of one frame at the given resolution.
pub fn stream_len(width: u32, height: u32) -> usize {
    (width as usize * height as usize) / 2
}

pub struct CompressedBlockCodec {
    descriptor: CodecDescriptor,
}

impl CompressedBlockCodec {
    pub fn new(descriptor: CodecDescriptor) -> Self {
        Self { descriptor }
    }
}

impl CodecBackend for CompressedBlockCodec {
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
        let expected = stream_len(self.descriptor.width, self.descriptor.height);
        if data.len() != expected {
            return Err(LoadError::format(format!(
                "block stream is {} bytes, expected exactly {expected}",
                data.len()
            )));
        }
        staging.write_with(&gpu.device, |dst| {
            dst[..expected].copy_from_slice(&data);
            Ok(())
        })?;
        Ok(vec![disk])
    }
}
