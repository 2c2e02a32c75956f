//! Rolling-window latency aggregation for the streaming pipeline.
//!
//! Each pipeline stage accumulates nanosecond duration samples into its own
//! window. Every `report_period` frame advances the aggregator reduces the
//! windows to arithmetic means, emits one report, and clears everything.
//! State is instance-owned and passed into the session, so parallel sessions
//! (and tests) never share timing vectors.

use std::fmt::Write as _;
use std::time::Duration;

use tracing::info;

/// Pipeline stage a duration sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DiskRead,
    Decode,
    DeviceTransfer,
    DeviceDecode,
    Upload,
    FrameTotal,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::DiskRead,
        Stage::Decode,
        Stage::DeviceTransfer,
        Stage::DeviceDecode,
        Stage::Upload,
        Stage::FrameTotal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::DiskRead => "disk_read",
            Stage::Decode => "decode",
            Stage::DeviceTransfer => "device_transfer",
            Stage::DeviceDecode => "device_decode",
            Stage::Upload => "upload",
            Stage::FrameTotal => "frame_total",
        }
    }
}

/// One stage duration measurement. Immutable once recorded.
#[derive(Debug, Clone, Copy)]
pub struct TimingSample {
    pub stage: Stage,
    pub duration: Duration,
    pub frame_index: usize,
}

impl TimingSample {
    pub fn new(stage: Stage, duration: Duration, frame_index: usize) -> Self {
        Self {
            stage,
            duration,
            frame_index,
        }
    }
}

/// Per-stage mean over one reporting window. `mean_ms` is `None` when the
/// stage recorded no samples in the window ("no data", never 0/0).
#[derive(Debug, Clone, Copy)]
pub struct StageMean {
    pub stage: Stage,
    pub mean_ms: Option<f64>,
    pub samples: usize,
}

/// Snapshot emitted every reporting period.
#[derive(Debug, Clone)]
pub struct LatencyReport {
    pub frame_counter: u64,
    pub stages: [StageMean; 6],
}

impl LatencyReport {
    pub fn stage(&self, stage: Stage) -> &StageMean {
        &self.stages[stage as usize]
    }
}

pub struct StatsAggregator {
    windows: [Vec<u64>; 6],
    report_period: u64,
}

impl StatsAggregator {
    pub fn new(report_period: u64) -> Self {
        assert!(report_period > 0, "report period must be non-zero");
        Self {
            windows: Default::default(),
            report_period,
        }
    }

    pub fn report_period(&self) -> u64 {
        self.report_period
    }

    /// Append a sample to its stage window.
    pub fn record(&mut self, sample: TimingSample) {
        let window = &mut self.windows[sample.stage as usize];
        debug_assert!(
            (window.len() as u64) < self.report_period,
            "stage window outgrew the report period"
        );
        window.push(sample.duration.as_nanos() as u64);
        metrics::histogram!("panostream_stage_ns", "stage" => sample.stage.name())
            .record(sample.duration.as_nanos() as f64);
    }

    /// Number of samples currently buffered for `stage`.
    pub fn window_len(&self, stage: Stage) -> usize {
        self.windows[stage as usize].len()
    }

    /// Emit and reset when `frame_counter` hits a multiple of the period.
    pub fn maybe_report(&mut self, frame_counter: u64) -> Option<LatencyReport> {
        if frame_counter == 0 || frame_counter % self.report_period != 0 {
            return None;
        }
        Some(self.report(frame_counter))
    }

    /// Unconditional report: reduce every window to its mean and clear.
    pub fn report(&mut self, frame_counter: u64) -> LatencyReport {
        let stages = Stage::ALL.map(|stage| {
            let window = &self.windows[stage as usize];
            let mean_ms = if window.is_empty() {
                None
            } else {
                let sum: f64 = window.iter().map(|&ns| ns as f64).sum();
                Some(sum / window.len() as f64 / 1e6)
            };
            StageMean {
                stage,
                mean_ms,
                samples: window.len(),
            }
        });

        let report = LatencyReport {
            frame_counter,
            stages,
        };
        self.log(&report);

        // Cleared only after the full report went out.
        for window in &mut self.windows {
            window.clear();
        }
        report
    }

    fn log(&self, report: &LatencyReport) {
        let mut lines = String::new();
        for mean in &report.stages {
            // Empty windows are skipped rather than reported as a number.
            if let Some(ms) = mean.mean_ms {
                let _ = write!(
                    lines,
                    "\n  {:>15}: {:8.3} ms  ({} samples)",
                    mean.stage.name(),
                    ms,
                    mean.samples
                );
            }
        }
        info!(
            frame = report.frame_counter,
            "latency means over last {} frames{}", self.report_period, lines
        );
    }
}
