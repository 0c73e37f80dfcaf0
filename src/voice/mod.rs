//! Voice processing module
//!
//! Handles PCM conversion, microphone capture and gapless playback.
//! The remote session that these feed lives in [`crate::live`].

pub mod codec;
mod capture;
mod device;
mod playback;

pub use capture::{AudioFrame, CpalInput, FrameAssembler, TransportUnit};
pub use codec::{INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use device::{AudioDevices, AudioInput, CpalDevices, FrameSender, OutputSink};
pub use playback::{CpalOutput, PlaybackScheduler, ScheduledFragment, ScheduledQueue};
