//! Audio capture from microphone
//!
//! The device delivers callback buffers of whatever size the backend picks;
//! [`FrameAssembler`] re-slices them into fixed-size [`AudioFrame`]s, and each
//! frame becomes one [`TransportUnit`] on its way to the remote session.

use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::codec::{self, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE};
use super::device::{AudioInput, FrameSender};
use crate::{Error, Result};

/// A fixed-length run of 16kHz mono samples in `[-1.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    #[must_use]
    pub const fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the frame at the capture rate
    #[must_use]
    pub fn duration(&self) -> std::time::Duration {
        let micros = self.samples.len() as u64 * 1_000_000 / u64::from(INPUT_SAMPLE_RATE);
        std::time::Duration::from_micros(micros)
    }
}

/// One encoded chunk of captured audio, ready for the wire
///
/// Immutable once built; consumed by a single channel send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportUnit {
    data: Vec<u8>,
    mime_type: &'static str,
}

impl TransportUnit {
    /// Encode a captured frame as 16-bit PCM
    #[must_use]
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            data: codec::float_to_pcm16(frame.samples()),
            mime_type: INPUT_MIME_TYPE,
        }
    }

    /// Raw 16-bit little-endian PCM payload
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Declared media type (`audio/pcm;rate=16000`)
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Number of samples carried
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Payload as transport text
    #[must_use]
    pub fn to_transport_text(&self) -> String {
        codec::bytes_to_transport_text(&self.data)
    }
}

/// Re-slices arbitrary sample buffers into frames of exactly `frame_size`
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// # Panics
    ///
    /// Panics if `frame_size` is zero
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples, returning every frame completed by them in order
    pub fn push(&mut self, mut data: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        while !data.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(AudioFrame::new(full));
            }
        }
        frames
    }

    /// Take the trailing partial frame, if any
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            None
        } else {
            Some(AudioFrame::new(std::mem::take(&mut self.pending)))
        }
    }

    /// Samples waiting for the next frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Handle to the thread that owns the running cpal stream
struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Captures 16kHz mono frames from the default input device
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// that exits (dropping the stream) when [`AudioInput::stop`] is called.
pub struct CpalInput {
    config: StreamConfig,
    frame_size: usize,
    worker: Option<CaptureWorker>,
}

impl CpalInput {
    /// Acquire the default input device
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no device supports 16kHz mono
    pub fn open(frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(Error::Config("frame size must be non-zero".to_string()));
        }

        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
            })
            .ok_or_else(|| {
                Error::DeviceUnavailable("no 16kHz mono input config found".to_string())
            })?;

        let config = supported_config
            .with_sample_rate(SampleRate(INPUT_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = INPUT_SAMPLE_RATE,
            frame_size,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            frame_size,
            worker: None,
        })
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let config = self.config.clone();
        let frame_size = self.frame_size;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("newscast-capture".to_string())
            .spawn(move || {
                let assembler = Arc::new(Mutex::new(FrameAssembler::new(frame_size)));
                let stream = match build_input_stream(&config, Arc::clone(&assembler), frames.clone())
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns on stop() or when the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);

                if let Some(frame) = assembler.lock().ok().and_then(|mut a| a.flush()) {
                    let _ = frames.send(frame);
                }
            })
            .map_err(|e| Error::DeviceUnavailable(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop_tx, thread });
                tracing::debug!("audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.thread.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    config: &StreamConfig,
    assembler: Arc<Mutex<FrameAssembler>>,
    frames: FrameSender,
) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device".to_string()))?;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let completed = match assembler.lock() {
                    Ok(mut a) => a.push(data),
                    Err(_) => return,
                };
                for frame in completed {
                    // Receiver gone means the session is tearing down
                    if frames.send(frame).is_err() {
                        return;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_second_yields_three_full_frames_and_a_partial() {
        let input: Vec<f32> = (0..INPUT_SAMPLE_RATE).map(|i| i as f32 / 16000.0).collect();
        let mut assembler = FrameAssembler::new(4096);

        // Irregular callback sizes, as a real backend would deliver
        let mut frames = Vec::new();
        for chunk in input.chunks(480) {
            frames.extend(assembler.push(chunk));
        }
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 4096));
        assert_eq!(assembler.pending(), 16000 - 3 * 4096);

        let last = assembler.flush().unwrap();
        assert_eq!(last.len(), 3712);
        frames.push(last);

        // Contiguous, non-overlapping slices of the input
        let rejoined: Vec<f32> = frames.iter().flat_map(|f| f.samples().to_vec()).collect();
        assert_eq!(rejoined, input);
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_large_push_splits_into_many_frames() {
        let mut assembler = FrameAssembler::new(4);
        let frames = assembler.push(&[0.0; 10]);
        assert_eq!(frames.len(), 2);
        assert_eq!(assembler.pending(), 2);
    }

    #[test]
    fn test_transport_unit_from_frame() {
        let frame = AudioFrame::new(vec![0.5; 4096]);
        let unit = TransportUnit::from_frame(&frame);
        assert_eq!(unit.mime_type(), "audio/pcm;rate=16000");
        assert_eq!(unit.data().len(), 8192);
        assert_eq!(unit.sample_count(), 4096);
        assert_eq!(&unit.data()[..2], &[0x00, 0x40]);
        let text = unit.to_transport_text();
        assert_eq!(codec::transport_text_to_bytes(&text).unwrap(), unit.data());
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 4096]);
        assert_eq!(frame.duration().as_millis(), 256);
    }
}
