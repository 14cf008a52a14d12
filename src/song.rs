//! Streaming song decoder.
//!
//! [`SongStream::open`] probes a media file, validates it, and hands the
//! demuxer and decoder to a background fill thread. The thread decodes
//! packet by packet, adapts channels, resamples to the output spec, and
//! pushes into the bounded [`SampleQueue`], blocking there whenever the
//! buffered duration reaches the bound. Consumers read through the queue's
//! two ports and never touch the decoder directly.

use crate::audio_data::{StreamResampler, adapt_to_stereo};
use crate::error::{AudioError, Result};
use crate::queue::{NowaitRead, SampleQueue};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use symphonia::{
    core::{
        audio::SampleBuffer,
        codecs::{CODEC_TYPE_NULL, DecoderOptions},
        errors::Error,
        formats::FormatOptions,
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
        units::TimeBase,
    },
    default::{get_codecs, get_probe},
};

/// Output format a [`SongStream`] delivers: the mixer's native spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A song being streamed from disk into a bounded queue of decoded frames.
pub struct SongStream {
    queue: Arc<SampleQueue>,
    stop: Arc<AtomicBool>,
    fill_thread: Option<JoinHandle<()>>,
    spec: StreamSpec,
}

impl SongStream {
    /// Open `path` for streaming playback, resampled to `target`.
    ///
    /// The container must hold exactly one audio stream. Probe and decoder
    /// setup happen on the caller's thread so format problems surface here;
    /// only the packet loop runs in the background.
    pub fn open(path: &str, target: StreamSpec, buffer_time: Duration) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| AudioError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::Format(format!("Failed to probe {}: {:?}", path, e)))?;

        let mut format = probed.format;

        let audio_tracks = format
            .tracks()
            .iter()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .count();
        if audio_tracks != 1 {
            return Err(AudioError::Format(format!(
                "{} audio streams found in {}, expected 1",
                audio_tracks, path
            )));
        }

        let track = format
            .default_track()
            .ok_or_else(|| AudioError::Format(format!("No default audio track in {}", path)))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioError::Format("Sample rate not found".to_string()))?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| AudioError::Format("Channel count not found".to_string()))?
            .count() as u16;

        let track_id = track.id;
        let time_base = track.codec_params.time_base;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::Decode(format!("Failed to create decoder: {:?}", e)))?;

        // Channel adaptation runs before the resampler, so it always sees
        // the target layout.
        let resampler = StreamResampler::new(sample_rate, target.sample_rate, target.channels, None)?;

        let capacity_frames = (target.sample_rate as f64 * buffer_time.as_secs_f64()) as usize;
        let queue = Arc::new(SampleQueue::new(
            capacity_frames,
            target.channels,
            target.sample_rate,
        ));
        let stop = Arc::new(AtomicBool::new(false));

        log::info!(
            "Streaming {}: {} Hz {}ch -> {} Hz, {:.1}s buffer",
            path,
            sample_rate,
            channels,
            target.sample_rate,
            buffer_time.as_secs_f64()
        );

        let fill = FillContext {
            queue: queue.clone(),
            stop: stop.clone(),
            resampler,
            track_id,
            time_base,
            source_rate: sample_rate,
            source_channels: channels,
            target,
            path: path.to_string(),
        };
        let fill_thread = std::thread::Builder::new()
            .name("song-fill".to_string())
            .spawn(move || fill.run(format, decoder))?;

        Ok(Self {
            queue,
            stop,
            fill_thread: Some(fill_thread),
            spec: target,
        })
    }

    /// Blocking consuming read of up to `frames` frames. Waits for the fill
    /// thread unless end of stream is reached first, in which case the
    /// remainder (possibly empty) is returned. Non-reentrant.
    pub fn read(&self, frames: usize) -> Result<Vec<f32>> {
        self.queue.read_blocking(frames)
    }

    /// Realtime port; see [`SampleQueue::read_nowait_into`].
    pub fn read_nowait_into(&self, frames: usize, out: &mut [f32]) -> NowaitRead {
        self.queue.read_nowait_into(frames, out)
    }

    /// Presentation timestamp of the most recent read, if known.
    pub fn last_pts(&self) -> Option<f64> {
        self.queue.last_read_pts()
    }

    /// True once the decoder reached end of stream (or the stream was
    /// closed); buffered frames may still remain to be drained.
    pub fn is_finished(&self) -> bool {
        self.queue.is_finished()
    }

    pub fn buffered_frames(&self) -> usize {
        self.queue.buffered_frames()
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Stop the fill thread and release the decoder.
    ///
    /// The stop flag keeps the loop from scheduling more work, closing the
    /// queue unblocks a push stuck on backpressure, and the join waits for
    /// any in-flight decode call: a decode cannot be aborted mid-packet,
    /// only awaited. Idempotent.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.queue.close();
        if let Some(handle) = self.fill_thread.take() {
            if handle.join().is_err() {
                log::error!("song fill thread panicked");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(queue: Arc<SampleQueue>, spec: StreamSpec) -> Self {
        Self {
            queue,
            stop: Arc::new(AtomicBool::new(false)),
            fill_thread: None,
            spec,
        }
    }
}

impl Drop for SongStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// State moved into the fill thread.
struct FillContext {
    queue: Arc<SampleQueue>,
    stop: Arc<AtomicBool>,
    resampler: StreamResampler,
    track_id: u32,
    time_base: Option<TimeBase>,
    source_rate: u32,
    source_channels: u16,
    target: StreamSpec,
    path: String,
}

impl FillContext {
    fn run(
        mut self,
        mut format: Box<dyn symphonia::core::formats::FormatReader>,
        mut decoder: Box<dyn symphonia::core::codecs::Decoder>,
    ) {
        // End time (seconds) of the last packet fed to the resampler; used
        // to timestamp the flushed tail.
        let mut input_end_secs: Option<f64> = None;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                log::debug!("song fill cancelled: {}", self.path);
                return;
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(_)) => break, // end-of-file
                Err(Error::DecodeError(e)) => {
                    log::warn!("skipping corrupt packet in {}: {}", self.path, e);
                    continue;
                }
                Err(e) => {
                    log::error!("error reading packet from {}: {:?}", self.path, e);
                    break;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let packet_pts = self.time_base.map(|tb| {
                let t = tb.calc_time(packet.ts());
                t.seconds as f64 + t.frac
            });

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::IoError(_)) => break, // also EOF in some formats
                Err(Error::DecodeError(e)) => {
                    log::warn!("skipping undecodable packet in {}: {}", self.path, e);
                    continue;
                }
                Err(e) => {
                    log::error!("error decoding packet from {}: {:?}", self.path, e);
                    break;
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity();
            let mut tmp = SampleBuffer::<f32>::new(capacity as u64, spec);
            tmp.copy_interleaved_ref(decoded);

            let stereo = adapt_to_stereo(tmp.samples().to_vec(), self.source_channels);
            let in_frames = stereo.len() / self.target.channels as usize;

            let out = match self.resampler.process(&stereo) {
                Ok(out) => out,
                Err(e) => {
                    log::error!("resampling failed for {}: {}", self.path, e);
                    break;
                }
            };

            input_end_secs = packet_pts.map(|p| p + in_frames as f64 / self.source_rate as f64);

            if out.is_empty() {
                continue;
            }

            let chunk_pts = self.chunk_pts(packet_pts, in_frames, out.len());
            if !self.queue.push_blocking(out, chunk_pts) {
                log::debug!("song queue closed, stopping fill: {}", self.path);
                return;
            }
        }

        // Natural end of stream: emit the resampler's tail, then mark EOF so
        // readers drain the remainder and stop.
        match self.resampler.flush() {
            Ok(tail) if !tail.is_empty() => {
                let tail_pts = input_end_secs.map(|end| {
                    end - (tail.len() / self.target.channels as usize) as f64
                        / self.target.sample_rate as f64
                });
                self.queue.push_blocking(tail, tail_pts);
            }
            Ok(_) => {}
            Err(e) => log::error!("resampler tail flush failed for {}: {}", self.path, e),
        }
        self.queue.finish();
        log::info!("song decode finished: {}", self.path);
    }

    /// Timestamp of the first frame of an emitted chunk.
    ///
    /// The resampler may be holding frames from earlier packets, so the
    /// emitted chunk ends where the consumed input ends (the packet's end
    /// minus what is still pending) and starts one output-chunk-length
    /// before that.
    fn chunk_pts(
        &self,
        packet_pts: Option<f64>,
        in_frames: usize,
        out_samples: usize,
    ) -> Option<f64> {
        let packet_pts = packet_pts?;
        let pending = self.resampler.pending_input_frames();
        let consumed_end =
            packet_pts + (in_frames as f64 - pending as f64) / self.source_rate as f64;
        let out_frames = out_samples / self.target.channels as usize;
        Some(consumed_end - out_frames as f64 / self.target.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stream() -> (Arc<SampleQueue>, SongStream) {
        let spec = StreamSpec {
            sample_rate: 48000,
            channels: 2,
        };
        let queue = Arc::new(SampleQueue::new(48000, 2, 48000));
        let stream = SongStream::from_parts(queue.clone(), spec);
        (queue, stream)
    }

    #[test]
    fn test_open_missing_file_fails() {
        let spec = StreamSpec {
            sample_rate: 48000,
            channels: 2,
        };
        let result = SongStream::open("/nonexistent/song.ogg", spec, Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[test]
    fn test_read_delegates_to_queue() {
        let (queue, stream) = test_stream();
        queue.push_blocking(vec![0.5f32; 100 * 2], Some(0.25));
        queue.finish();

        let samples = stream.read(100).unwrap();
        assert_eq!(samples.len(), 100 * 2);
        assert_eq!(stream.last_pts(), Some(0.25));
        assert!(stream.is_finished());
    }

    #[test]
    fn test_read_rejects_zero() {
        let (_queue, stream) = test_stream();
        assert!(matches!(
            stream.read(0),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (queue, mut stream) = test_stream();
        stream.close();
        stream.close();
        assert!(queue.is_finished());
    }
}
