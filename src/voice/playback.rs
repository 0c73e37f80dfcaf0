//! Gapless playback of streamed speech
//!
//! [`PlaybackScheduler`] places each decoded fragment on the output clock
//! directly after the previous one. [`CpalOutput`] is the device side: it
//! renders the scheduled buffers sample-accurately and exposes the clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::codec;
use super::device::OutputSink;
use crate::{Error, Result};

/// Where one fragment landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledFragment {
    /// First frame of the fragment
    pub start: u64,
    /// Length in frames
    pub frames: u64,
}

impl ScheduledFragment {
    /// Frame just past the fragment
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.frames
    }
}

/// Schedules decoded fragments back-to-back on an output clock
///
/// The cursor is the next free frame on the output clock. It only moves
/// forward: a fragment starts at `max(cursor, now)` and the cursor advances
/// by the fragment's length. Fragments are never reordered.
pub struct PlaybackScheduler {
    sink: Arc<dyn OutputSink>,
    cursor: u64,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
}

impl PlaybackScheduler {
    /// Create a scheduler whose cursor starts at the sink's current time
    ///
    /// `max_consecutive_failures` of 0 tolerates any number of bad fragments.
    #[must_use]
    pub fn new(sink: Arc<dyn OutputSink>, max_consecutive_failures: u32) -> Self {
        let cursor = sink.now();
        Self {
            sink,
            cursor,
            consecutive_failures: 0,
            max_consecutive_failures,
        }
    }

    /// Next free frame on the output clock
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Cursor position in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cursor_secs(&self) -> f64 {
        self.cursor as f64 / f64::from(self.sink.sample_rate())
    }

    /// Decode a transport-encoded PCM fragment and schedule it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the fragment is malformed; the cursor is
    /// unchanged and the session may continue. Once the configured number of
    /// consecutive failures is exceeded, returns [`Error::Transport`] instead.
    /// Returns [`Error::Audio`] if the sink rejects the buffer.
    pub fn schedule_fragment(&mut self, payload: &str) -> Result<ScheduledFragment> {
        match codec::decode_fragment(payload) {
            Ok(samples) => {
                self.consecutive_failures = 0;
                self.schedule_samples(samples)
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.max_consecutive_failures > 0
                    && self.consecutive_failures > self.max_consecutive_failures
                {
                    return Err(Error::Transport(format!(
                        "{} consecutive audio fragments failed to decode",
                        self.consecutive_failures
                    )));
                }
                Err(e)
            }
        }
    }

    /// Schedule already-decoded samples
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the sink rejects the buffer
    pub fn schedule_samples(&mut self, samples: Vec<f32>) -> Result<ScheduledFragment> {
        let frames = samples.len() as u64;
        // The clock may move between reading it and queueing
        let start = self
            .sink
            .schedule(self.cursor.max(self.sink.now()), samples)?;
        self.cursor = start + frames;

        Ok(ScheduledFragment { start, frames })
    }

    /// Drop all audio not yet played (barge-in)
    ///
    /// The sink fast-forwards its clock past the discarded audio, so the
    /// cursor stays put and the next fragment plays immediately.
    pub fn interrupt(&mut self) {
        self.sink.clear();
        tracing::debug!(cursor = self.cursor, "playback interrupted");
    }
}

/// Sample-accurate queue of scheduled buffers, rendered by the output callback
#[derive(Debug, Default)]
pub struct ScheduledQueue {
    clock: u64,
    buffers: VecDeque<ScheduledBuffer>,
}

#[derive(Debug)]
struct ScheduledBuffer {
    start: u64,
    samples: Vec<f32>,
}

impl ScheduledBuffer {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

impl ScheduledQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.clock
    }

    /// Queue a buffer; buffers must be pushed in start order
    ///
    /// A start already rendered past is moved up to the clock, so the whole
    /// buffer still plays. Returns the start actually used.
    pub fn push(&mut self, start: u64, samples: Vec<f32>) -> u64 {
        let start = start.max(self.clock);
        if !samples.is_empty() {
            self.buffers.push_back(ScheduledBuffer { start, samples });
        }
        start
    }

    /// Drop every queued buffer, fast-forwarding the clock past them
    pub fn clear(&mut self) {
        if let Some(last) = self.buffers.back() {
            self.clock = self.clock.max(last.end());
        }
        self.buffers.clear();
    }

    /// Frames queued but not yet rendered
    #[must_use]
    pub fn pending_frames(&self) -> u64 {
        self.buffers
            .back()
            .map_or(0, |last| last.end().saturating_sub(self.clock))
    }

    /// Fill an interleaved output buffer, advancing the clock one frame per
    /// `channels` samples; gaps render as silence
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            let sample = self.next_sample();
            frame.fill(sample);
        }
    }

    fn next_sample(&mut self) -> f32 {
        let pos = self.clock;
        self.clock += 1;

        while let Some(front) = self.buffers.front() {
            if pos >= front.end() {
                self.buffers.pop_front();
                continue;
            }
            if pos < front.start {
                return 0.0;
            }
            #[allow(clippy::cast_possible_truncation)]
            return front.samples[(pos - front.start) as usize];
        }
        0.0
    }
}

/// Handle to the thread that owns the running cpal stream
struct OutputWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Plays scheduled buffers on the default output device
///
/// Like capture, the cpal stream lives on its own thread; the clock and
/// queue are shared with the stream callback.
pub struct CpalOutput {
    sample_rate: u32,
    queue: Arc<Mutex<ScheduledQueue>>,
    worker: Mutex<Option<OutputWorker>>,
}

impl CpalOutput {
    /// Acquire the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(sample_rate: u32) -> Result<Self> {
        let config = output_config(sample_rate)?;
        let queue = Arc::new(Mutex::new(ScheduledQueue::new()));

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let stream_queue = Arc::clone(&queue);

        let thread = std::thread::Builder::new()
            .name("newscast-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(&config, stream_queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::Audio(format!("failed to spawn playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::Audio(
                    "playback thread exited during startup".to_string(),
                ));
            }
        }

        tracing::debug!(sample_rate, "audio playback started");

        Ok(Self {
            sample_rate,
            queue,
            worker: Mutex::new(Some(OutputWorker { stop_tx, thread })),
        })
    }

    fn is_closed(&self) -> bool {
        self.worker.lock().map_or(true, |w| w.is_none())
    }
}

impl OutputSink for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> u64 {
        self.queue.lock().map_or(0, |q| q.now())
    }

    fn schedule(&self, start: u64, samples: Vec<f32>) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::Audio("output device closed".to_string()));
        }
        Ok(self
            .queue
            .lock()
            .map_err(|_| Error::Audio("playback queue poisoned".to_string()))?
            .push(start, samples))
    }

    fn clear(&self) {
        if let Ok(mut q) = self.queue.lock() {
            q.clear();
        }
    }

    fn close(&self) {
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            if worker.thread.join().is_err() {
                tracing::warn!("playback thread panicked");
            }
            self.clear();
            tracing::debug!("audio playback stopped");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn output_config(sample_rate: u32) -> Result<StreamConfig> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio playback initialized"
    );

    Ok(config)
}

fn build_output_stream(config: &StreamConfig, queue: Arc<Mutex<ScheduledQueue>>) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match queue.lock() {
                Ok(mut q) => q.render(data, channels),
                Err(_) => data.fill(0.0),
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
