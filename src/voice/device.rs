//! Audio device seam
//!
//! The live session only talks to devices through these traits so the
//! pipeline can run against cpal hardware or in-memory fakes. Every method
//! on an opened device is safe to call after the device was released.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::capture::{AudioFrame, CpalInput};
use super::playback::CpalOutput;
use crate::Result;

/// Where an [`AudioInput`] delivers its frames
pub type FrameSender = mpsc::UnboundedSender<AudioFrame>;

/// An acquired microphone that can stream fixed-size frames
pub trait AudioInput: Send {
    /// Begin streaming frames into `frames`
    ///
    /// Calling `start` while already capturing is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DeviceUnavailable`] if the stream cannot be started
    fn start(&mut self, frames: FrameSender) -> Result<()>;

    /// Stop streaming; no frame is delivered after this returns
    fn stop(&mut self);

    /// Whether frames are currently being produced
    fn is_capturing(&self) -> bool;
}

/// An acquired output device with its own sample clock
///
/// The clock counts frames at [`OutputSink::sample_rate`] since the device
/// was opened and never goes backwards.
pub trait OutputSink: Send + Sync {
    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Current position of the output clock, in frames
    fn now(&self) -> u64;

    /// Queue `samples` to start playing at clock position `start`
    ///
    /// A `start` the clock has already passed plays the whole buffer from
    /// the current position. Returns the position playback actually starts.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Audio`] if the sink has been closed
    fn schedule(&self, start: u64, samples: Vec<f32>) -> Result<u64>;

    /// Discard everything not yet played and move the clock to the end of
    /// the discarded audio
    fn clear(&self);

    /// Release the device; idempotent
    fn close(&self);
}

/// Factory for the session's input and output devices
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone for 16kHz mono capture in `frame_size` frames
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DeviceUnavailable`] if no usable input exists
    fn open_input(&self, frame_size: usize) -> Result<Box<dyn AudioInput>>;

    /// Acquire the speaker at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Audio`] if no usable output exists
    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputSink>>;
}

/// Devices backed by the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_input(&self, frame_size: usize) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(CpalInput::open(frame_size)?))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputSink>> {
        Ok(Arc::new(CpalOutput::open(sample_rate)?))
    }
}
