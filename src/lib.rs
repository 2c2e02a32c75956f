//! panostream: streaming texture decode/upload pipeline for panoramic
//! video, with per-stage latency measurement across codec backends.

pub mod codec;
pub mod error;
pub mod gpu;
pub mod pacer;
pub mod sequence;
pub mod session;
pub mod stats;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;
use crate::gpu::staging::BufferingMode;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub playback: PlaybackConfig,
}

/// What to stream: where the frames live and how they were compressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub directory: PathBuf,
    pub base: String,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub codec: CodecKind,
    pub buffering: BufferingMode,
}

/// How to present it: cadence and reporting interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Minimum milliseconds between frame advances.
    pub cadence_ms: u64,
    /// Emit a latency report every this many presented frames.
    pub report_period: u64,
}

impl PlaybackConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("frames"),
            base: "frame".into(),
            frame_count: 580,
            width: 1024,
            height: 512,
            codec: CodecKind::CompressedBlock,
            buffering: BufferingMode::Pipelined,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            // Source media runs at ~14 fps; display refresh is much higher.
            cadence_ms: 70,
            report_period: 100,
        }
    }
}

impl Config {
    /// Defaults, overlaid with an optional TOML file, overlaid with
    /// `PANO_*` environment variables (e.g. `PANO_PLAYBACK__CADENCE_MS`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let loaded: Config = builder
            .add_source(config::Environment::with_prefix("PANO").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(loaded)
    }
}
