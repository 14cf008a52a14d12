//! Correlation between the audio hardware clock and the process clock.
//!
//! The output callback runs in the hardware's time domain; gameplay timing
//! runs on the process clock. The mixer anchors the two on the first
//! callback and from then on publishes the wall-clock instant matching
//! sample 0 of the current song. The game thread reads that value wait-free
//! once per frame.
//!
//! The published offset is not monotonic: after an underrun the next
//! timestamped buffer republishes a jumped value. Consumers absorb resyncs
//! instead of treating them as errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Offsets below this are anchoring jitter, not real skew; snap them to zero.
const ANCHOR_SNAP_SECS: f64 = 0.001;

/// Publishes the song-start instant across the callback boundary.
///
/// All times are seconds on a process-local origin captured at construction.
/// The value is stored as f64 bits in an atomic, with NaN meaning "not yet
/// resolved", so the reader side never takes a lock.
pub struct StreamClock {
    origin: Instant,
    song_start_bits: AtomicU64,
}

impl StreamClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            song_start_bits: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    /// Seconds elapsed on the process clock since this clock's origin.
    pub fn wallclock_now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Compute the fixed offset between the process clock and the hardware
    /// time domain, from a single simultaneous observation of both.
    pub fn anchor_offset(&self, hw_time_secs: f64) -> f64 {
        let offset = self.wallclock_now() - hw_time_secs;
        if (0.0..ANCHOR_SNAP_SECS).contains(&offset) {
            0.0
        } else {
            offset
        }
    }

    /// Publish the wall-clock instant of song sample 0 (seconds on the
    /// origin). Called from the realtime callback.
    pub fn publish_song_start(&self, secs: f64) {
        self.song_start_bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    /// Mark the song start as unknown, e.g. when the current frame carries
    /// no presentation timestamp. A stale value must not survive that.
    pub fn invalidate(&self) {
        self.song_start_bits
            .store(f64::NAN.to_bits(), Ordering::Relaxed);
    }

    /// Wall-clock instant of song sample 0, or `None` while unresolved.
    pub fn song_start(&self) -> Option<f64> {
        let secs = f64::from_bits(self.song_start_bits.load(Ordering::Relaxed));
        if secs.is_nan() { None } else { Some(secs) }
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unresolved() {
        let clock = StreamClock::new();
        assert_eq!(clock.song_start(), None);
    }

    #[test]
    fn test_publish_and_invalidate() {
        let clock = StreamClock::new();
        clock.publish_song_start(12.5);
        assert_eq!(clock.song_start(), Some(12.5));
        clock.invalidate();
        assert_eq!(clock.song_start(), None);
    }

    #[test]
    fn test_sub_millisecond_anchor_snaps_to_zero() {
        let clock = StreamClock::new();
        // A hardware time just slightly behind the wall clock: the residue is
        // anchoring jitter and must collapse to exactly zero.
        let hw_time = clock.wallclock_now() - 0.0002;
        assert_eq!(clock.anchor_offset(hw_time), 0.0);
    }

    #[test]
    fn test_large_anchor_offset_is_kept() {
        let clock = StreamClock::new();
        let hw_time = clock.wallclock_now() - 0.25;
        let offset = clock.anchor_offset(hw_time);
        assert!((offset - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_song_start_stable_under_steady_publishing() {
        // Simulate steady playback: the hardware consumes frames at the same
        // rate the pts advances, so the published song start barely moves.
        let clock = StreamClock::new();
        let offset = clock.anchor_offset(0.0);
        let mut published = Vec::new();
        for i in 0..10 {
            let hw_time = i as f64 * 0.010;
            let pts = i as f64 * 0.010;
            clock.publish_song_start(hw_time + offset - pts);
            published.push(clock.song_start().unwrap());
        }
        let min = published.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = published.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!(max - min < 0.002, "song start spread {} too wide", max - min);
    }
}
