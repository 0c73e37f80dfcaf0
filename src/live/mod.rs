//! Real-time voice conversation with a remote model
//!
//! [`LiveSession`] ties the microphone, the remote [`SessionChannel`] and the
//! speaker together. Wire details of the Gemini Live endpoint stay in
//! [`gemini`] and [`protocol`].

mod channel;
pub mod gemini;
pub mod protocol;
mod session;
mod transcript;

pub use channel::{
    ChannelCommand, ChannelStatus, InboundEvent, LiveConnector, LiveLink, SessionChannel,
};
pub use gemini::GeminiConnector;
pub use session::{
    CONNECTION_ERROR_MESSAGE, LiveSession, PLAYBACK_ERROR_MESSAGE, START_FAILURE_MESSAGE,
    SessionState, SessionStatus,
};
pub use transcript::{Transcript, TranscriptAggregator, TranscriptEntry};
