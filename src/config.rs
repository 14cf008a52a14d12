use crate::format::SampleFormat;
use crate::song::StreamSpec;
use std::time::Duration;

/// Relative gains applied while mixing song and effect streams.
///
/// The song is attenuated to leave headroom for effects. The most recently
/// triggered effect plays louder than the rest; all other concurrent effects
/// split `effect_pool` equally so rapid-fire hits cannot clip the output.
/// These are tuned constants, not invariants; adjust to taste.
#[derive(Debug, Clone, Copy)]
pub struct MixGains {
    /// Gain applied to the song stream
    pub song: f32,
    /// Gain for the most recently triggered effect
    pub latest_effect: f32,
    /// Total gain budget shared by all other active effects
    pub effect_pool: f32,
}

impl Default for MixGains {
    fn default() -> Self {
        Self {
            song: 0.5,
            latest_effect: 0.6,
            effect_pool: 0.1,
        }
    }
}

/// Configuration descriptor for an [`AudioPlayer`](crate::AudioPlayer).
#[derive(Debug, Clone)]
pub struct PlayerDesc {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Number of output channels (stereo only is supported)
    pub channels: u16,
    /// Hardware sample format; the output stream is built with exactly this type
    pub sample_format: SampleFormat,
    /// How much decoded song audio to keep buffered ahead of playback
    pub buffer_time: Duration,
    /// Mixing gains for song and effects
    pub gains: MixGains,
}

impl PlayerDesc {
    /// Format that song streams and effect buffers must be delivered in.
    pub fn stream_spec(&self) -> StreamSpec {
        StreamSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

impl Default for PlayerDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            sample_format: SampleFormat::default(),
            buffer_time: Duration::from_secs(5),
            gains: MixGains::default(),
        }
    }
}

/// Which hardware output to open.
#[derive(Debug, Clone)]
pub enum OutputDevice {
    /// The host's default output device
    Default,
    /// First output device whose name matches (case-insensitive substring)
    Named(String),
}

impl Default for OutputDevice {
    fn default() -> Self {
        Self::Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_desc() {
        let desc = PlayerDesc::default();
        assert_eq!(desc.sample_rate, 48000);
        assert_eq!(desc.channels, 2);
        assert_eq!(desc.buffer_time, Duration::from_secs(5));
    }

    #[test]
    fn test_default_gains_leave_headroom() {
        let gains = MixGains::default();
        assert!(gains.song + gains.latest_effect + gains.effect_pool <= 1.25);
        assert!(gains.latest_effect > gains.effect_pool);
    }
}
