use crate::error::{AudioError, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// Fixed number of source frames fed to rubato per processing call.
const CHUNK_FRAMES: usize = 1024;

/// Type of resampler algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplerType {
    /// Fast polynomial resampler - lower quality but faster
    Fast,
    /// Sinc interpolation resampler - higher quality but slower
    Sinc,
}

impl Default for ResamplerType {
    fn default() -> Self {
        Self::Fast
    }
}

enum ResamplerImpl {
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

impl ResamplerImpl {
    fn process(
        &mut self,
        input: &[Vec<f32>],
    ) -> std::result::Result<Vec<Vec<f32>>, rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.process(input, None),
            Self::Sinc(r) => r.process(input, None),
        }
    }

    fn process_partial(
        &mut self,
        input: Option<&[Vec<f32>]>,
    ) -> std::result::Result<Vec<Vec<f32>>, rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.process_partial(input, None),
            Self::Sinc(r) => r.process_partial(input, None),
        }
    }
}

/// Streaming resampler for the decode pipeline.
///
/// Rubato wants fixed-size input chunks, while a decoder produces packets of
/// whatever size the container chose. Incoming samples are accumulated until
/// a full chunk is ready; whatever cannot fill a chunk stays pending until
/// the next packet or the end-of-stream flush. When source and target rates
/// match this is a passthrough.
pub struct StreamResampler {
    resampler: Option<ResamplerImpl>,
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: usize,
    /// Interleaved samples waiting for a full chunk.
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        resampler_type: Option<ResamplerType>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(AudioError::Resample(
                "sample rates must be greater than 0".to_string(),
            ));
        }
        if channels == 0 {
            return Err(AudioError::Resample(
                "channel count must be greater than 0".to_string(),
            ));
        }

        if source_sample_rate == target_sample_rate {
            return Ok(Self {
                resampler: None,
                source_sample_rate,
                target_sample_rate,
                channels: channels as usize,
                pending: Vec::new(),
            });
        }

        // target/source (output/input)
        let resample_ratio = target_sample_rate as f64 / source_sample_rate as f64;
        let resampler_type = resampler_type.unwrap_or_default();

        log::info!(
            "Creating {:?} resampler: {} Hz -> {} Hz (fixed input: {} frames)",
            resampler_type,
            source_sample_rate,
            target_sample_rate,
            CHUNK_FRAMES
        );

        let resampler = match resampler_type {
            ResamplerType::Fast => {
                let fast = FastFixedIn::new(
                    resample_ratio,
                    1.0, // we're not changing it dynamically
                    PolynomialDegree::Septic,
                    CHUNK_FRAMES,
                    channels as usize,
                )
                .map_err(|e| {
                    AudioError::Resample(format!("Failed to create fast resampler: {}", e))
                })?;
                ResamplerImpl::Fast(fast)
            }
            ResamplerType::Sinc => {
                let params = SincInterpolationParameters {
                    sinc_len: 256,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 256,
                    window: WindowFunction::BlackmanHarris2,
                };

                let sinc = SincFixedIn::new(
                    resample_ratio,
                    1.0, // we're not changing it dynamically
                    params,
                    CHUNK_FRAMES,
                    channels as usize,
                )
                .map_err(|e| {
                    AudioError::Resample(format!("Failed to create sinc resampler: {}", e))
                })?;
                ResamplerImpl::Sinc(sinc)
            }
        };

        Ok(Self {
            resampler: Some(resampler),
            source_sample_rate,
            target_sample_rate,
            channels: channels as usize,
            pending: Vec::new(),
        })
    }

    /// Feed interleaved samples at the source rate; returns all resampled
    /// output that became ready (possibly empty while a chunk accumulates).
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let channels = self.channels;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        let mut output = Vec::new();
        while self.pending.len() / channels >= CHUNK_FRAMES {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_FRAMES * channels).collect();
            let waves_in = deinterleave(&chunk, channels);
            let waves_out = resampler
                .process(&waves_in)
                .map_err(|e| AudioError::Resample(format!("Streaming resampling error: {}", e)))?;
            interleave_into(&waves_out, channels, &mut output);
        }
        Ok(output)
    }

    /// Drain the pending partial chunk and the resampler's internal tail.
    /// Call exactly once, at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let channels = self.channels;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(std::mem::take(&mut self.pending));
        };

        let mut output = Vec::new();
        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            let waves_in = deinterleave(&chunk, channels);
            let waves_out = resampler
                .process_partial(Some(waves_in.as_slice()))
                .map_err(|e| AudioError::Resample(format!("Resampler flush error: {}", e)))?;
            interleave_into(&waves_out, channels, &mut output);
        }
        let tail = resampler
            .process_partial(None)
            .map_err(|e| AudioError::Resample(format!("Resampler flush error: {}", e)))?;
        interleave_into(&tail, channels, &mut output);
        Ok(output)
    }

    /// Source frames accumulated but not yet resampled.
    pub fn pending_input_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }
}

fn deinterleave(chunk: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = chunk.len() / channels;
    let mut waves = vec![Vec::with_capacity(frames); channels];
    for frame in chunk.chunks(channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            waves[ch].push(sample);
        }
    }
    waves
}

fn interleave_into(waves: &[Vec<f32>], channels: usize, output: &mut Vec<f32>) {
    if waves.is_empty() {
        return;
    }
    let frames = waves[0].len();
    output.reserve(frames * channels);
    for frame_idx in 0..frames {
        for wave in waves {
            output.push(wave[frame_idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampler_creation() {
        let resampler = StreamResampler::new(44100, 48000, 2, None);
        assert!(resampler.is_ok());

        let resampler = resampler.unwrap();
        assert_eq!(resampler.source_sample_rate(), 44100);
        assert_eq!(resampler.target_sample_rate(), 48000);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(StreamResampler::new(0, 48000, 2, None).is_err());
        assert!(StreamResampler::new(44100, 0, 2, None).is_err());
        assert!(StreamResampler::new(44100, 48000, 0, None).is_err());
    }

    #[test]
    fn test_equal_rates_pass_through() {
        let mut resampler = StreamResampler::new(48000, 48000, 2, None).unwrap();
        let input = vec![0.1f32; 300 * 2];
        let output = resampler.process(&input).unwrap();
        assert_eq!(output, input);
        assert_eq!(resampler.pending_input_frames(), 0);
        assert!(resampler.flush().unwrap().is_empty());
    }

    #[test]
    fn test_accumulates_until_chunk_ready() {
        let mut resampler = StreamResampler::new(44100, 48000, 2, None).unwrap();
        // 300 frames is less than one chunk: nothing comes out yet.
        let output = resampler.process(&vec![0.0f32; 300 * 2]).unwrap();
        assert!(output.is_empty());
        assert_eq!(resampler.pending_input_frames(), 300);

        // Another 800 frames crosses the 1024-frame threshold.
        let output = resampler.process(&vec![0.0f32; 800 * 2]).unwrap();
        assert!(!output.is_empty());
        assert_eq!(resampler.pending_input_frames(), 76);
    }

    #[test]
    fn test_output_length_tracks_ratio() {
        let mut resampler = StreamResampler::new(44100, 48000, 2, None).unwrap();
        let total_in_frames = 44100;
        let mut total_out_frames = 0;
        for chunk in vec![0.25f32; total_in_frames * 2].chunks(1000) {
            total_out_frames += resampler.process(chunk).unwrap().len() / 2;
        }
        total_out_frames += resampler.flush().unwrap().len() / 2;

        // One second in, roughly one second out at the new rate.
        let expected: i64 = 48000;
        let tolerance = (CHUNK_FRAMES * 2) as i64;
        assert!(
            (total_out_frames as i64 - expected).abs() <= tolerance,
            "expected ~{} frames, got {}",
            expected,
            total_out_frames
        );
    }

    #[test]
    fn test_flush_drains_pending() {
        let mut resampler = StreamResampler::new(44100, 48000, 2, None).unwrap();
        resampler.process(&vec![0.5f32; 500 * 2]).unwrap();
        assert_eq!(resampler.pending_input_frames(), 500);
        let tail = resampler.flush().unwrap();
        assert!(!tail.is_empty());
        assert_eq!(resampler.pending_input_frames(), 0);
    }
}
