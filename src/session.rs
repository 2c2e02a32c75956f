//! The streaming session: pacer, codec, staging pool, uploader and stats
//! composed behind one render-facing operation.

use std::time::Instant;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};

use crate::codec::{self, CodecBackend, CodecDescriptor};
use crate::error::LoadError;
use crate::gpu::{GpuContext, StagingBufferPool, TextureUploader};
use crate::pacer::{FramePacer, PacerDecision};
use crate::sequence::FrameSequence;
use crate::stats::{Stage, StatsAggregator, TimingSample};
use crate::Config;

/// One panoramic stream: owns the texture, the staging memory and all
/// per-frame state. Driven once per render call by the external renderer;
/// everything happens on that thread.
pub struct StreamingSession {
    descriptor: CodecDescriptor,
    sequence: FrameSequence,
    backend: Box<dyn CodecBackend>,
    pool: StagingBufferPool,
    uploader: TextureUploader,
    pacer: FramePacer,
    stats: StatsAggregator,
    /// Frames successfully presented since session start.
    advances: u64,
}

impl StreamingSession {
    pub fn new(gpu: &GpuContext, config: &Config) -> Result<Self> {
        if config.playback.report_period == 0 {
            return Err(eyre!("report period must be non-zero"));
        }
        let stats = StatsAggregator::new(config.playback.report_period);
        let stream = &config.stream;
        let codec = stream.codec;
        let descriptor = CodecDescriptor::new(codec, stream.width, stream.height)?;
        let sequence = FrameSequence::new(
            &stream.directory,
            stream.base.as_str(),
            codec.extension(),
            stream.frame_count,
        );
        let backend = codec::create_backend(gpu, descriptor.clone())?;
        let pool = StagingBufferPool::new(
            gpu,
            descriptor.staging_size,
            stream.buffering,
            descriptor.locus,
        );
        let uploader = TextureUploader::new(
            gpu,
            descriptor.width,
            descriptor.height,
            descriptor.texture_format,
        )?;
        let pacer = FramePacer::new(config.playback.cadence(), sequence.len());

        info!(
            ?codec,
            width = descriptor.width,
            height = descriptor.height,
            frames = sequence.len(),
            buffers = pool.len(),
            cadence_ms = config.playback.cadence_ms,
            "streaming session ready"
        );

        Ok(Self {
            descriptor,
            sequence,
            backend,
            pool,
            uploader,
            pacer,
            stats,
            advances: 0,
        })
    }

    pub fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    pub fn texture(&self) -> &wgpu::Texture {
        self.uploader.texture()
    }

    pub fn current_frame(&self) -> usize {
        self.pacer.current_frame()
    }

    pub fn advances(&self) -> u64 {
        self.advances
    }

    /// Latency aggregator, reporting on the configured period.
    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// Advance the stream if the cadence says so, then hand the renderer
    /// the current frame's texture. On a frame failure the previous
    /// texture stays bound and the stream self-heals on the next advance.
    pub fn tick(&mut self, gpu: &GpuContext, now: Instant) -> &wgpu::TextureView {
        if let PacerDecision::Advance(frame_index) = self.pacer.tick(now) {
            let started = Instant::now();
            match self.advance(gpu, frame_index) {
                Ok(samples) => {
                    for sample in samples {
                        self.stats.record(sample);
                    }
                    self.stats.record(TimingSample::new(
                        Stage::FrameTotal,
                        started.elapsed(),
                        frame_index,
                    ));
                    self.advances += 1;
                    self.stats.maybe_report(self.advances);
                }
                Err(LoadError::Io(e)) => {
                    metrics::counter!("panostream_frames_skipped").increment(1);
                    warn!(frame = frame_index, "frame unreadable, keeping previous texture: {e}");
                }
                Err(e @ LoadError::Format(_)) => {
                    metrics::counter!("panostream_frames_skipped").increment(1);
                    error!(frame = frame_index, "frame rejected: {e}");
                }
                Err(e @ LoadError::Device(_)) => {
                    metrics::counter!("panostream_frames_skipped").increment(1);
                    error!(frame = frame_index, "frame aborted: {e}");
                }
            }
        }
        self.uploader.texture_view()
    }

    /// Flush any buffered stage means, e.g. at shutdown.
    pub fn final_report(&mut self) -> Option<crate::stats::LatencyReport> {
        if self.advances > 0 {
            Some(self.stats.report(self.advances))
        } else {
            None
        }
    }

    fn advance(
        &mut self,
        gpu: &GpuContext,
        frame_index: usize,
    ) -> Result<Vec<TimingSample>, LoadError> {
        let path = self.sequence.path(frame_index);
        let staging = self.pool.acquire();
        let mut samples = self.backend.load(gpu, &path, frame_index, staging)?;
        samples.push(self.uploader.commit(gpu, staging, frame_index)?);
        Ok(samples)
    }
}
