mod loader;
mod resampler;

pub use loader::load_pcm;
pub use resampler::{ResamplerType, StreamResampler};

use std::sync::Arc;
use std::time::Duration;

/// Immutable, reference-counted PCM audio, stored interleaved.
///
/// Sound-effect payloads are shared this way: triggering the same effect
/// twice clones the handle, never the samples, so rapid retriggers cost one
/// `Arc` bump each. Layout is interleaved (`[L0, R0, L1, R1, ...]` for
/// stereo), matching what audio files and output devices use.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    inner: Arc<PcmInner>,
}

#[derive(Debug)]
struct PcmInner {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    total_frames: usize,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let total_frames = samples.len() / channels as usize;
        Self {
            inner: Arc::new(PcmInner {
                samples,
                sample_rate,
                channels,
                total_frames,
            }),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.inner.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels
    }

    pub fn total_frames(&self) -> usize {
        self.inner.total_frames
    }

    pub fn duration(&self) -> Duration {
        if self.inner.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.inner.total_frames as f64 / self.inner.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.samples.len()
    }
}

/// Adapt an interleaved buffer to stereo: mono is duplicated into both
/// channels, wider layouts are averaged down and then duplicated.
pub(crate) fn adapt_to_stereo(samples: Vec<f32>, channels: u16) -> Vec<f32> {
    match channels {
        2 => samples,
        1 => {
            let mut out = Vec::with_capacity(samples.len() * 2);
            for s in samples {
                out.push(s);
                out.push(s);
            }
            out
        }
        n => {
            let n = n as usize;
            let mut out = Vec::with_capacity(samples.len() / n * 2);
            for frame in samples.chunks(n) {
                let avg = frame.iter().sum::<f32>() / n as f32;
                out.push(avg);
                out.push(avg);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_buffer_accessors() {
        let buffer = PcmBuffer::new(vec![0.0; 48000 * 2], 48000, 2);
        assert_eq!(buffer.total_frames(), 48000);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_pcm_buffer_shares_samples() {
        let buffer = PcmBuffer::new(vec![0.5; 64], 44100, 2);
        let clone = buffer.clone();
        assert_eq!(buffer.samples().as_ptr(), clone.samples().as_ptr());
    }

    #[test]
    fn test_mono_duplicates_to_stereo() {
        let out = adapt_to_stereo(vec![0.1, 0.2, 0.3], 1);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_stereo_passes_through() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(adapt_to_stereo(samples.clone(), 2), samples);
    }

    #[test]
    fn test_surround_downmixes_then_duplicates() {
        // One 4-channel frame averaging to 0.25.
        let out = adapt_to_stereo(vec![0.1, 0.2, 0.3, 0.4], 4);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.25).abs() < 1e-6);
        assert_eq!(out[0], out[1]);
    }
}
