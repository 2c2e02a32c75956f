use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::codec::CodecKind;

/// Probe a frame directory for the codec it was packed with, by extension
/// of frame 000.
pub fn detect_codec(directory: &Path, base: &str) -> Result<CodecKind> {
    info!("Auto-detecting codec in {}...", directory.display());

    for kind in CodecKind::ALL {
        let probe = directory.join(format!("{base}000{}", kind.extension()));
        if probe.exists() {
            info!("Found {:?} sequence: {}", kind, probe.display());
            return Ok(kind);
        }
    }

    Err(eyre!(
        "no frame sequence '{base}000.*' found in {}",
        directory.display()
    ))
}
