//! Cadence pacer: decouples frame advancement from render-tick rate.
//!
//! The source media runs well below display refresh, so re-decoding every
//! render tick would waste work and tie playback speed to the display.
//! The pacer advances the frame index at most once per cadence interval.
//!
//! Time is slotted: the epoch is the first observed tick, and an advance is
//! recorded against the start of the cadence slot it lands in. Recorded
//! advance timestamps are therefore always >= one cadence apart, while the
//! number of advances over a span of T ms is floor(T / cadence) no matter
//! how tick times align with the cadence grid. A stalled renderer advances
//! one frame and drops the rest of the backlog: playback stays on schedule
//! instead of bursting.

use std::time::{Duration, Instant};

/// Outcome of one render tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerDecision {
    /// Load frame `.0` this tick.
    Advance(usize),
    /// Keep presenting the current texture.
    Hold,
}

pub struct FramePacer {
    cadence: Duration,
    frame_count: usize,
    /// First tick ever observed; all slot math is relative to this.
    epoch: Option<Instant>,
    /// Cadence-slot offset of the last advance, relative to the epoch.
    last_advance: Option<Duration>,
    current: usize,
}

impl FramePacer {
    pub fn new(cadence: Duration, frame_count: usize) -> Self {
        assert!(frame_count > 0, "frame sequence must be non-empty");
        assert!(!cadence.is_zero(), "cadence must be non-zero");
        Self {
            cadence,
            frame_count,
            epoch: None,
            last_advance: None,
            current: 0,
        }
    }

    /// Frame index the stream currently presents.
    pub fn current_frame(&self) -> usize {
        self.current
    }

    /// Slot-relative timestamp of the last advance, if any.
    pub fn last_advance(&self) -> Option<Duration> {
        self.last_advance
    }

    /// Decide whether this render tick advances the stream.
    pub fn tick(&mut self, now: Instant) -> PacerDecision {
        let epoch = *self.epoch.get_or_insert(now);
        let elapsed = now.saturating_duration_since(epoch);

        let due = match self.last_advance {
            Some(last) => last + self.cadence,
            None => self.cadence,
        };
        if elapsed < due {
            return PacerDecision::Hold;
        }

        // Snap the recorded timestamp to the cadence slot containing `now`.
        let cadence_ns = self.cadence.as_nanos();
        let slot = elapsed.as_nanos() / cadence_ns;
        self.last_advance = Some(Duration::from_nanos((slot * cadence_ns) as u64));

        self.current = (self.current + 1) % self.frame_count;
        PacerDecision::Advance(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn first_tick_holds() {
        let mut pacer = FramePacer::new(ms(70), 10);
        let t0 = Instant::now();
        assert_eq!(pacer.tick(t0), PacerDecision::Hold);
        assert_eq!(pacer.current_frame(), 0);
    }

    #[test]
    fn advances_once_per_cadence_interval() {
        let mut pacer = FramePacer::new(ms(70), 10);
        let t0 = Instant::now();
        pacer.tick(t0);
        assert_eq!(pacer.tick(t0 + ms(69)), PacerDecision::Hold);
        assert_eq!(pacer.tick(t0 + ms(70)), PacerDecision::Advance(1));
        // Same interval: no second advance.
        assert_eq!(pacer.tick(t0 + ms(71)), PacerDecision::Hold);
        assert_eq!(pacer.tick(t0 + ms(140)), PacerDecision::Advance(2));
    }

    #[test]
    fn frame_index_wraps_modulo_sequence_length() {
        let mut pacer = FramePacer::new(ms(10), 3);
        let t0 = Instant::now();
        pacer.tick(t0);
        let mut advances = 0usize;
        for k in 1..=9 {
            if let PacerDecision::Advance(idx) = pacer.tick(t0 + ms(10 * k)) {
                advances += 1;
                assert_eq!(idx, advances % 3);
            }
        }
        assert_eq!(advances, 9);
        assert_eq!(pacer.current_frame(), 9 % 3);
    }

    #[test]
    fn stall_drops_backlog_instead_of_bursting() {
        let mut pacer = FramePacer::new(ms(70), 580);
        let t0 = Instant::now();
        pacer.tick(t0);
        // Renderer stalls for half a second: exactly one advance on resume.
        assert_eq!(pacer.tick(t0 + ms(500)), PacerDecision::Advance(1));
        assert_eq!(pacer.tick(t0 + ms(505)), PacerDecision::Hold);
        // Next advance waits for the slot after the one we resumed in.
        assert_eq!(pacer.tick(t0 + ms(559)), PacerDecision::Hold);
        assert_eq!(pacer.tick(t0 + ms(560)), PacerDecision::Advance(2));
    }

    #[test]
    fn recorded_advance_timestamps_respect_cadence() {
        let mut pacer = FramePacer::new(ms(70), 580);
        let t0 = Instant::now();
        pacer.tick(t0);
        let mut previous: Option<Duration> = None;
        for k in 1..=125 {
            if let PacerDecision::Advance(_) = pacer.tick(t0 + ms(16 * k)) {
                let stamp = pacer.last_advance().unwrap();
                if let Some(prev) = previous {
                    assert!(
                        stamp - prev >= ms(70),
                        "advances {prev:?} and {stamp:?} closer than cadence"
                    );
                }
                previous = Some(stamp);
            }
        }
    }

    #[test]
    fn scenario_2000ms_of_16ms_ticks_at_70ms_cadence() {
        // 125 render ticks spanning 2000 ms must yield floor(2000/70) = 28
        // frame advances, landing on frame index 28.
        let mut pacer = FramePacer::new(ms(70), 580);
        let t0 = Instant::now();
        pacer.tick(t0);
        let mut advances = 0usize;
        for k in 1..=125u64 {
            if let PacerDecision::Advance(_) = pacer.tick(t0 + ms(16 * k)) {
                advances += 1;
            }
        }
        assert_eq!(advances, 28);
        assert_eq!(pacer.current_frame(), 28);
    }
}
