//! Device context and shared GPU plumbing.

pub mod staging;
pub mod timer;
pub mod uploader;

pub use staging::{StagingBuffer, StagingBufferPool};
pub use uploader::TextureUploader;

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::error::LoadError;

/// Optional features the pipeline can exploit when the adapter offers them.
const WANTED_FEATURES: [wgpu::Features; 3] = [
    wgpu::Features::TIMESTAMP_QUERY,
    wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS,
    wgpu::Features::TEXTURE_COMPRESSION_BC,
];

/// Device/queue pair plus the capability flags the codecs care about.
///
/// Context creation is the collaborator's job in a real renderer; the
/// harness and the tests build one through [`GpuContext::new`].
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    features: wgpu::Features,
}

impl GpuContext {
    /// Acquire a headless high-performance device.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| eyre!("No suitable GPU adapter found"))?;

        info!("GPU: {}", adapter.get_info().name);

        let mut required_features = wgpu::Features::empty();
        for feature in WANTED_FEATURES {
            if adapter.features().contains(feature) {
                required_features |= feature;
            }
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("panostream device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        Ok(Self {
            device,
            queue,
            features: required_features,
        })
    }

    /// Encoder-level timestamp queries available (upload timing).
    pub fn encoder_timestamps(&self) -> bool {
        self.features.contains(
            wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS,
        )
    }

    /// Pass-level timestamp queries available (compute decode timing).
    pub fn pass_timestamps(&self) -> bool {
        self.features.contains(wgpu::Features::TIMESTAMP_QUERY)
    }

    /// BC1 texture sampling available.
    pub fn block_compression(&self) -> bool {
        self.features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
    }
}

/// Map a buffer slice and block until the map is resolved.
///
/// One synchronous round trip: the callback result travels over a channel
/// and `Maintain::Wait` drives the device until it fires. This is the only
/// wait primitive in the crate; nothing busy-polls a ready flag.
pub(crate) fn map_blocking(
    device: &wgpu::Device,
    slice: wgpu::BufferSlice<'_>,
    mode: wgpu::MapMode,
) -> Result<(), LoadError> {
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(mode, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    match rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LoadError::device(format!("buffer map failed: {e}"))),
        Err(_) => Err(LoadError::device("buffer map callback dropped")),
    }
}
