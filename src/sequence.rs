//! Wrap-around frame sequence with a path template.
//!
//! Frame files share the naming scheme `{base}{index:03}{ext}` inside one
//! directory, e.g. `sunset042.dxt1`. The template is injected from
//! configuration; the core never embeds paths.

use std::path::{Path, PathBuf};

/// Ordered, wrap-around set of numbered frame files. Immutable after
/// construction; one per session.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    directory: PathBuf,
    base: String,
    extension: String,
    frame_count: usize,
}

impl FrameSequence {
    pub fn new(
        directory: impl Into<PathBuf>,
        base: impl Into<String>,
        extension: impl Into<String>,
        frame_count: usize,
    ) -> Self {
        Self {
            directory: directory.into(),
            base: base.into(),
            extension: extension.into(),
            frame_count,
        }
    }

    /// Number of frames before the sequence wraps.
    pub fn len(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of frame `index`. Indices wrap modulo the sequence length.
    pub fn path(&self, index: usize) -> PathBuf {
        let index = index % self.frame_count.max(1);
        self.directory
            .join(format!("{}{:03}{}", self.base, index, self.extension))
    }
}
