//! Bounded queue of decoded song samples.
//!
//! One producer (the decode fill thread) and two consumer ports share this
//! queue: a cooperative blocking port used by game logic, and a non-blocking
//! port used by the realtime audio callback. The producer blocks once the
//! buffered duration reaches the configured bound; draining from either port
//! releases it. The realtime port only ever `try_lock`s and never waits.

use crate::error::{AudioError, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Outcome of a non-blocking read from the realtime port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NowaitRead {
    /// Exactly the requested number of frames were written to the output.
    /// `pts` is the presentation timestamp (seconds) of the first frame,
    /// when the source provided one.
    Filled { pts: Option<f64> },
    /// Not enough data buffered yet (or the lock was contended); nothing was
    /// written. The caller substitutes silence for this buffer.
    Pending,
    /// End of stream reached and the remaining data cannot satisfy the
    /// request. Permanent once returned.
    Ended,
}

/// One decoded chunk as pushed by the fill thread. `pts` is the timestamp of
/// the chunk's first frame; frames consumed off the front are accounted for
/// when the read-side timestamp is computed.
struct Chunk {
    samples: Vec<f32>,
    pts: Option<f64>,
    consumed_frames: usize,
}

struct Inner {
    chunks: VecDeque<Chunk>,
    buffered_frames: usize,
    finished: bool,
    closed: bool,
    read_busy: bool,
    last_read_pts: Option<f64>,
}

/// Bounded FIFO of interleaved f32 frames with per-chunk timestamps.
pub struct SampleQueue {
    inner: Mutex<Inner>,
    not_full: Condvar,
    data_ready: Condvar,
    capacity_frames: usize,
    channels: usize,
    sample_rate: u32,
}

impl SampleQueue {
    pub fn new(capacity_frames: usize, channels: u16, sample_rate: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                buffered_frames: 0,
                finished: false,
                closed: false,
                read_busy: false,
                last_read_pts: None,
            }),
            not_full: Condvar::new(),
            data_ready: Condvar::new(),
            capacity_frames,
            channels: channels as usize,
            sample_rate,
        }
    }

    /// Append a decoded chunk, then block while the queue is at or above its
    /// capacity. Returns `false` once the queue has been closed, which tells
    /// the fill loop to stop.
    ///
    /// The chunk is appended before the capacity check, so the buffered level
    /// can overshoot the bound by at most one chunk.
    pub fn push_blocking(&self, samples: Vec<f32>, pts: Option<f64>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return false;
        }
        if !samples.is_empty() {
            let frames = samples.len() / self.channels;
            inner.chunks.push_back(Chunk {
                samples,
                pts,
                consumed_frames: 0,
            });
            inner.buffered_frames += frames;
            self.data_ready.notify_all();
        }
        while inner.buffered_frames >= self.capacity_frames && !inner.closed {
            inner = self.not_full.wait(inner).unwrap();
        }
        !inner.closed
    }

    /// Blocking consuming read. Waits until `frames` are buffered or the
    /// stream ends, then returns up to `frames` frames (the remainder at end
    /// of stream, possibly empty).
    ///
    /// Non-reentrant: a second call while one is waiting fails immediately.
    pub fn read_blocking(&self, frames: usize) -> Result<Vec<f32>> {
        if frames == 0 {
            return Err(AudioError::InvalidArgument(
                "frames to read must be positive".into(),
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.read_busy {
            return Err(AudioError::Concurrency(
                "a blocking read is already in progress".into(),
            ));
        }
        inner.read_busy = true;
        while inner.buffered_frames < frames && !inner.finished && !inner.closed {
            inner = self.data_ready.wait(inner).unwrap();
        }
        let take = frames.min(inner.buffered_frames);
        let (samples, pts) = self.pop_frames(&mut inner, take);
        inner.last_read_pts = pts;
        inner.read_busy = false;
        self.not_full.notify_all();
        Ok(samples)
    }

    /// Realtime port: write exactly `frames` frames into `out` if that much
    /// is buffered, without ever waiting. Returns [`NowaitRead::Pending`]
    /// when the lock is contended or data is short, so the caller can emit
    /// silence and try again next callback.
    pub fn read_nowait_into(&self, frames: usize, out: &mut [f32]) -> NowaitRead {
        let Ok(mut inner) = self.inner.try_lock() else {
            return NowaitRead::Pending;
        };
        if inner.buffered_frames >= frames {
            let pts = self.pop_frames_into(&mut inner, frames, out);
            inner.last_read_pts = pts;
            if inner.buffered_frames < self.capacity_frames {
                self.not_full.notify_all();
            }
            return NowaitRead::Filled { pts };
        }
        // Wake a producer stuck on backpressure even when we take nothing.
        self.not_full.notify_all();
        if inner.finished {
            // The tail shorter than one callback buffer is dropped.
            inner.chunks.clear();
            inner.buffered_frames = 0;
            NowaitRead::Ended
        } else {
            NowaitRead::Pending
        }
    }

    /// Mark end of stream: no more pushes will follow. Wakes blocked readers.
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.finished = true;
        self.data_ready.notify_all();
    }

    /// Discard buffered data and wake everyone. Idempotent; pushes and
    /// blocking reads return immediately afterwards.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.finished = true;
        inner.chunks.clear();
        inner.buffered_frames = 0;
        self.not_full.notify_all();
        self.data_ready.notify_all();
    }

    /// Timestamp of the first frame of the most recent read, if the source
    /// provided timestamps.
    pub fn last_read_pts(&self) -> Option<f64> {
        self.inner.lock().unwrap().last_read_pts
    }

    pub fn buffered_frames(&self) -> usize {
        self.inner.lock().unwrap().buffered_frames
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Timestamp at the current read cursor: the front chunk's timestamp
    /// advanced by the frames already consumed from it.
    fn cursor_pts(&self, inner: &Inner) -> Option<f64> {
        let chunk = inner.chunks.front()?;
        chunk
            .pts
            .map(|p| p + chunk.consumed_frames as f64 / self.sample_rate as f64)
    }

    fn pop_frames(&self, inner: &mut Inner, frames: usize) -> (Vec<f32>, Option<f64>) {
        let mut samples = vec![0.0f32; frames * self.channels];
        let pts = self.pop_frames_into(inner, frames, &mut samples);
        (samples, pts)
    }

    fn pop_frames_into(&self, inner: &mut Inner, frames: usize, out: &mut [f32]) -> Option<f64> {
        let pts = self.cursor_pts(inner);
        let mut written = 0usize;
        let mut remaining = frames;
        while remaining > 0 {
            let Some(chunk) = inner.chunks.front_mut() else {
                break;
            };
            let chunk_frames = chunk.samples.len() / self.channels;
            let available = chunk_frames - chunk.consumed_frames;
            let take = available.min(remaining);
            let start = chunk.consumed_frames * self.channels;
            let end = start + take * self.channels;
            out[written..written + (end - start)].copy_from_slice(&chunk.samples[start..end]);
            written += end - start;
            chunk.consumed_frames += take;
            remaining -= take;
            if chunk.consumed_frames == chunk_frames {
                inner.chunks.pop_front();
            }
        }
        inner.buffered_frames -= frames - remaining;
        pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn stereo_chunk(frames: usize, value: f32) -> Vec<f32> {
        vec![value; frames * 2]
    }

    #[test]
    fn test_nowait_exact_or_nothing() {
        let queue = SampleQueue::new(1000, 2, 48000);
        queue.push_blocking(stereo_chunk(100, 0.5), Some(0.0));

        let mut out = vec![0.0f32; 256 * 2];
        // 256 frames requested, only 100 buffered: nothing is written.
        assert_eq!(queue.read_nowait_into(256, &mut out), NowaitRead::Pending);
        assert!(out.iter().all(|&s| s == 0.0));

        // 100 frames requested: all of them arrive at once.
        let mut out = vec![0.0f32; 100 * 2];
        assert_eq!(
            queue.read_nowait_into(100, &mut out),
            NowaitRead::Filled { pts: Some(0.0) }
        );
        assert!(out.iter().all(|&s| s == 0.5));
        assert_eq!(queue.buffered_frames(), 0);
    }

    #[test]
    fn test_nowait_ended_is_permanent() {
        let queue = SampleQueue::new(1000, 2, 48000);
        queue.push_blocking(stereo_chunk(50, 0.1), None);
        queue.finish();

        let mut out = vec![0.0f32; 64 * 2];
        assert_eq!(queue.read_nowait_into(64, &mut out), NowaitRead::Ended);
        for _ in 0..10 {
            assert_eq!(queue.read_nowait_into(64, &mut out), NowaitRead::Ended);
        }
    }

    #[test]
    fn test_backpressure_bound_holds() {
        // Capacity 480 frames, chunks of 100: the producer may overshoot by
        // at most one chunk, never more.
        let queue = Arc::new(SampleQueue::new(480, 2, 48000));
        let producer_queue = queue.clone();
        let producer = thread::spawn(move || {
            for i in 0..50 {
                if !producer_queue.push_blocking(stereo_chunk(100, i as f32), None) {
                    return;
                }
            }
            producer_queue.finish();
        });

        let mut out = vec![0.0f32; 100 * 2];
        let mut drained = 0;
        while drained < 50 * 100 {
            match queue.read_nowait_into(100, &mut out) {
                NowaitRead::Filled { .. } => {
                    drained += 100;
                    assert!(
                        queue.buffered_frames() <= 480 + 100,
                        "buffered {} frames exceeds bound",
                        queue.buffered_frames()
                    );
                }
                NowaitRead::Pending => thread::sleep(Duration::from_micros(200)),
                NowaitRead::Ended => break,
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_blocking_read_waits_for_data() {
        let queue = Arc::new(SampleQueue::new(1000, 2, 48000));
        let reader_queue = queue.clone();
        let reader = thread::spawn(move || reader_queue.read_blocking(200).unwrap());

        thread::sleep(Duration::from_millis(20));
        queue.push_blocking(stereo_chunk(200, 0.3), Some(1.5));

        let samples = reader.join().unwrap();
        assert_eq!(samples.len(), 200 * 2);
        assert!(samples.iter().all(|&s| s == 0.3));
        assert_eq!(queue.last_read_pts(), Some(1.5));
    }

    #[test]
    fn test_blocking_read_returns_remainder_at_eof() {
        let queue = SampleQueue::new(1000, 2, 48000);
        queue.push_blocking(stereo_chunk(30, 0.2), None);
        queue.finish();

        let samples = queue.read_blocking(100).unwrap();
        assert_eq!(samples.len(), 30 * 2);
        let samples = queue.read_blocking(100).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_blocking_read_rejects_zero_frames() {
        let queue = SampleQueue::new(1000, 2, 48000);
        assert!(matches!(
            queue.read_blocking(0),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_concurrent_blocking_reads_rejected() {
        let queue = Arc::new(SampleQueue::new(1000, 2, 48000));
        let first_queue = queue.clone();
        let first = thread::spawn(move || first_queue.read_blocking(500));

        // Give the first read time to start waiting.
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            queue.read_blocking(10),
            Err(AudioError::Concurrency(_))
        ));

        queue.close();
        let samples = first.join().unwrap().unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_close_unblocks_producer() {
        let queue = Arc::new(SampleQueue::new(100, 2, 48000));
        let producer_queue = queue.clone();
        let producer = thread::spawn(move || {
            // Fills the queue and then blocks on backpressure.
            producer_queue.push_blocking(stereo_chunk(100, 0.0), None)
        });

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(!producer.join().unwrap());
        // Close twice is fine.
        queue.close();
    }

    #[test]
    fn test_pts_advances_within_chunk() {
        let queue = SampleQueue::new(48000, 2, 48000);
        // One chunk of 4800 frames starting at t = 2.0 s.
        queue.push_blocking(stereo_chunk(4800, 0.1), Some(2.0));

        let mut out = vec![0.0f32; 2400 * 2];
        assert_eq!(
            queue.read_nowait_into(2400, &mut out),
            NowaitRead::Filled { pts: Some(2.0) }
        );
        // Second half of the chunk is 2400 frames (= 50 ms) later.
        match queue.read_nowait_into(2400, &mut out) {
            NowaitRead::Filled { pts: Some(p) } => assert!((p - 2.05).abs() < 1e-9),
            other => panic!("unexpected read result: {other:?}"),
        }
    }

    #[test]
    fn test_pts_none_propagates() {
        let queue = SampleQueue::new(1000, 2, 48000);
        queue.push_blocking(stereo_chunk(100, 0.1), None);
        let mut out = vec![0.0f32; 100 * 2];
        assert_eq!(
            queue.read_nowait_into(100, &mut out),
            NowaitRead::Filled { pts: None }
        );
    }
}
