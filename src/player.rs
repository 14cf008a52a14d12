//! Realtime mixer and output stream.
//!
//! [`AudioPlayer`] owns the hardware output stream. Each hardware callback
//! renders one buffer: silence, plus the song pulled through the decoder's
//! non-blocking port, plus any active sound effects, clipped to the output
//! format. The callback never blocks and never lets an error escape; when
//! data or a lock is unavailable it emits silence for that buffer and moves
//! on.
//!
//! Sound effects cross into the callback over a bounded channel. The
//! callback owns the active-effect pool outright, so mixing them needs no
//! lock at all.

use crate::audio_data::PcmBuffer;
use crate::clock::StreamClock;
use crate::config::{MixGains, OutputDevice, PlayerDesc};
use crate::error::{AudioError, Result};
use crate::format::SampleFormat;
use crate::queue::NowaitRead;
use crate::song::SongStream;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Triggers buffered between game thread and callback.
const EFFECT_QUEUE_CAP: usize = 64;
/// Upper bound on concurrently playing effects; the oldest is dropped past
/// this.
const MAX_ACTIVE_EFFECTS: usize = 32;

/// One in-flight sound effect. The sample data is shared; the cursor is
/// exclusively owned by the callback.
struct ActiveEffect {
    buffer: PcmBuffer,
    cursor_frames: usize,
    triggered_at: Instant,
}

/// Mixer state shared between the public API and the output callback.
pub(crate) struct MixerState {
    desc: PlayerDesc,
    song: Mutex<Option<SongStream>>,
    playing: AtomicBool,
    stream_active: AtomicBool,
    clock: StreamClock,
    effect_tx: Sender<PcmBuffer>,
    effect_rx: Receiver<PcmBuffer>,
}

/// State owned by the callback closure: the active-effect pool, the frozen
/// clock anchor, and a scratch buffer for song reads.
#[derive(Default)]
pub(crate) struct RenderState {
    effects: Vec<ActiveEffect>,
    pa_offset: Option<f64>,
    song_scratch: Vec<f32>,
}

impl MixerState {
    fn new(desc: PlayerDesc) -> Self {
        let (effect_tx, effect_rx) = bounded(EFFECT_QUEUE_CAP);
        Self {
            desc,
            song: Mutex::new(None),
            playing: AtomicBool::new(false),
            stream_active: AtomicBool::new(false),
            clock: StreamClock::new(),
            effect_tx,
            effect_rx,
        }
    }

    /// Render one output buffer. `hw_time_secs` is the callback timestamp in
    /// the hardware stream's time domain; `out` holds
    /// `frames * channels` interleaved samples in the normalized f32 domain.
    pub(crate) fn render(&self, state: &mut RenderState, out: &mut [f32], hw_time_secs: f64) {
        let channels = self.desc.channels as usize;
        let frames = out.len() / channels;
        let format = self.desc.sample_format;
        let gains = self.desc.gains;

        // Anchor the hardware clock against the process clock once, on the
        // first callback.
        let pa_offset = match state.pa_offset {
            Some(offset) => offset,
            None => {
                let offset = self.clock.anchor_offset(hw_time_secs);
                log::info!("hardware clock anchored, offset {:.6}s", offset);
                state.pa_offset = Some(offset);
                offset
            }
        };

        out.fill(format.silence_value());

        self.mix_song(state, out, frames, hw_time_secs, pa_offset, &gains);
        self.mix_effects(state, out, frames, channels, &gains);

        for sample in out.iter_mut() {
            *sample = format.clip(*sample);
        }
    }

    fn mix_song(
        &self,
        state: &mut RenderState,
        out: &mut [f32],
        frames: usize,
        hw_time_secs: f64,
        pa_offset: f64,
        gains: &MixGains,
    ) {
        if !self.playing.load(Ordering::Acquire) {
            return;
        }
        // Contended means the game thread is swapping songs; this buffer
        // stays silent rather than waiting.
        let Ok(guard) = self.song.try_lock() else {
            return;
        };
        let Some(song) = guard.as_ref() else {
            return;
        };

        if state.song_scratch.len() != out.len() {
            state.song_scratch.resize(out.len(), 0.0);
        }

        match song.read_nowait_into(frames, &mut state.song_scratch) {
            NowaitRead::Filled { pts } => {
                for (o, s) in out.iter_mut().zip(&state.song_scratch) {
                    *o += s * gains.song;
                }
                match pts {
                    Some(pts) => {
                        self.clock
                            .publish_song_start(hw_time_secs + pa_offset - pts);
                    }
                    None => self.clock.invalidate(),
                }
            }
            NowaitRead::Pending => {}
            NowaitRead::Ended => {
                self.playing.store(false, Ordering::Release);
                log::info!("song playback ended");
            }
        }
    }

    fn mix_effects(
        &self,
        state: &mut RenderState,
        out: &mut [f32],
        frames: usize,
        channels: usize,
        gains: &MixGains,
    ) {
        for buffer in self.effect_rx.try_iter() {
            if state.effects.len() >= MAX_ACTIVE_EFFECTS {
                state.effects.remove(0);
                log::warn!("active effect pool full, dropping oldest effect");
            }
            state.effects.push(ActiveEffect {
                buffer,
                cursor_frames: 0,
                triggered_at: Instant::now(),
            });
        }

        let count = state.effects.len();
        if count == 0 {
            return;
        }

        // The most recent trigger is the one the player just caused, so it
        // gets the loud gain; everything older splits a small shared budget
        // to keep simultaneous hits from drowning the mix.
        let pool_gain = if count > 1 {
            gains.effect_pool / (count - 1) as f32
        } else {
            0.0
        };

        for (idx, effect) in state.effects.iter_mut().enumerate() {
            let gain = if idx + 1 == count {
                gains.latest_effect
            } else {
                pool_gain
            };
            let samples = effect.buffer.samples();
            let remaining = effect.buffer.total_frames() - effect.cursor_frames;
            let take = remaining.min(frames);
            let start = effect.cursor_frames * channels;
            for i in 0..take * channels {
                out[i] += samples[start + i] * gain;
            }
            effect.cursor_frames += take;
        }

        state.effects.retain(|effect| {
            let done = effect.cursor_frames >= effect.buffer.total_frames();
            if done {
                log::debug!(
                    "effect finished {:.0}ms after trigger",
                    effect.triggered_at.elapsed().as_secs_f64() * 1000.0
                );
            }
            !done
        });
    }
}

/// Low-latency audio player for a rhythm game: one streamed song, a pool of
/// triggered sound effects, and a published song-start clock the game reads
/// every frame.
pub struct AudioPlayer {
    state: Arc<MixerState>,
    stream: Option<cpal::Stream>,
}

impl AudioPlayer {
    /// Stereo only; any other channel count is rejected here so the hot
    /// path never has to consider layout.
    pub fn new(desc: PlayerDesc) -> Result<Self> {
        if desc.channels != 2 {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "only stereo output is supported, got {} channels",
                desc.channels
            )));
        }
        Ok(Self {
            state: Arc::new(MixerState::new(desc)),
            stream: None,
        })
    }

    /// Open the hardware output and start the mixing callback. Calling
    /// while already active logs and returns without effect.
    pub fn start_stream(&mut self, device: OutputDevice) -> Result<()> {
        if self.stream.is_some() {
            log::warn!("output stream already active");
            return Ok(());
        }

        let host = cpal::default_host();
        let device = match device {
            OutputDevice::Default => host.default_output_device().ok_or_else(|| {
                AudioError::Device("no default output device available".to_string())
            })?,
            OutputDevice::Named(name) => find_output_device(&host, &name)?,
        };
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let config = cpal::StreamConfig {
            channels: self.state.desc.channels,
            sample_rate: cpal::SampleRate(self.state.desc.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match self.state.desc.sample_format {
            SampleFormat::F32 => self.create_stream::<f32>(&device, &config)?,
            SampleFormat::I16 => self.create_stream::<i16>(&device, &config)?,
        };

        stream
            .play()
            .map_err(|e| AudioError::Device(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        self.state.stream_active.store(true, Ordering::Release);
        log::info!(
            "audio output started on '{}' ({} Hz, {:?})",
            device_name,
            self.state.desc.sample_rate,
            self.state.desc.sample_format
        );
        Ok(())
    }

    /// Open a song for streaming playback in the player's native format. Any
    /// previously loaded song is closed. With `play_now` set and the stream
    /// active, playback begins on the next callback.
    pub fn load_song(&self, path: &str, play_now: bool) -> Result<()> {
        let spec = self.state.desc.stream_spec();
        let new_song = SongStream::open(path, spec, self.state.desc.buffer_time)?;

        self.state.playing.store(false, Ordering::Release);
        let old_song = {
            let mut guard = self.state.song.lock().unwrap();
            let old = guard.take();
            *guard = Some(new_song);
            old
        };
        if let Some(mut old) = old_song {
            old.close();
        }

        if play_now && self.is_active() {
            self.state.playing.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Begin (or restart after a pause) playback of the loaded song.
    pub fn resume_song(&self) -> Result<()> {
        if !self.is_active() {
            return Err(AudioError::Precondition(
                "cannot resume song: output stream not active".to_string(),
            ));
        }
        let guard = self.state.song.lock().unwrap();
        if guard.is_none() {
            return Err(AudioError::Precondition(
                "cannot resume song: no song loaded".to_string(),
            ));
        }
        if self.state.playing.load(Ordering::Acquire) {
            return Err(AudioError::Precondition(
                "cannot resume song: song is already playing".to_string(),
            ));
        }
        self.state.playing.store(true, Ordering::Release);
        Ok(())
    }

    /// Trigger a sound effect. Invalid triggers are logged and dropped;
    /// a bad trigger must never take down playback.
    pub fn play_sound_effect(&self, buffer: PcmBuffer) {
        if !self.is_active() {
            log::error!("cannot play sound effect: stream not active");
            return;
        }
        if buffer.is_empty() {
            log::warn!("ignoring empty sound effect buffer");
            return;
        }
        if self.state.effect_tx.try_send(buffer).is_err() {
            log::warn!("sound effect queue full, dropping trigger");
        }
    }

    /// Close the song, stop the hardware stream, and discard pending effect
    /// triggers. Safe to call even if the stream was never started.
    pub fn stop_stream(&mut self) {
        let song = self.state.song.lock().unwrap().take();
        if let Some(mut song) = song {
            song.close();
        }
        self.state.playing.store(false, Ordering::Release);
        self.state.stream_active.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            drop(stream); // This stops the stream
            log::info!("audio output stopped");
        }
        for _ in self.state.effect_rx.try_iter() {}
        self.state.clock.invalidate();
    }

    pub fn is_active(&self) -> bool {
        self.state.stream_active.load(Ordering::Acquire)
    }

    pub fn is_song_playing(&self) -> bool {
        self.state.playing.load(Ordering::Acquire)
    }

    /// Wall-clock instant (seconds on the player's clock origin) matching
    /// sample 0 of the current song, or `None` while unresolved. Read this
    /// once per frame to keep visuals locked to audio; occasional jumps
    /// after an underrun are expected.
    pub fn song_clock_offset(&self) -> Option<f64> {
        self.state.clock.song_start()
    }

    pub fn desc(&self) -> &PlayerDesc {
        &self.state.desc
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let state = self.state.clone();
        let mut render_state = RenderState::default();
        let mut mix: Vec<f32> = Vec::new();
        let mut hw_epoch: Option<cpal::StreamInstant> = None;

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                    // cpal exposes no absolute hardware epoch; time is
                    // measured from the first callback's instant.
                    let callback_ts = info.timestamp().callback;
                    let epoch = *hw_epoch.get_or_insert(callback_ts);
                    let hw_time = callback_ts
                        .duration_since(&epoch)
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(0.0);

                    if mix.len() != data.len() {
                        mix.resize(data.len(), 0.0);
                    }
                    state.render(&mut render_state, &mut mix, hw_time);

                    for (o, s) in data.iter_mut().zip(&mix) {
                        *o = T::from_sample(*s);
                    }
                },
                move |err| {
                    log::error!("audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::Device(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

fn find_output_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    let wanted = name.to_lowercase();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Device(format!("Failed to enumerate output devices: {}", e)))?;
    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name.to_lowercase().contains(&wanted) {
                return Ok(device);
            }
        }
    }
    Err(AudioError::Device(format!(
        "no output device matching '{}'",
        name
    )))
}
