//! Real-time audio core for rhythm games: a streaming song decoder feeding
//! a bounded queue, a hardware-driven mixing callback that blends the song
//! with triggered sound effects, and a published audio-to-wallclock offset
//! that gameplay logic reads to stay in sync with what the player hears.

pub mod audio_data;
pub mod clock;
pub mod config;
pub mod error;
pub mod format;
pub mod player;
pub mod queue;
pub mod song;

pub use audio_data::{PcmBuffer, ResamplerType, StreamResampler, load_pcm};
pub use clock::StreamClock;
pub use config::{MixGains, OutputDevice, PlayerDesc};
pub use error::{AudioError, Result};
pub use format::SampleFormat;
pub use player::AudioPlayer;
pub use queue::{NowaitRead, SampleQueue};
pub use song::{SongStream, StreamSpec};
