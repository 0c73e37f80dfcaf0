//! Naija NewsCast - AI news podcasts and real-time voice conversation
//!
//! This library provides:
//! - PCM conversion, microphone capture and gapless playback
//! - Live bidirectional voice sessions with per-turn transcripts
//! - Grounded news summaries, quick chat and deep analysis
//! - Two-host podcast synthesis to WAV
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  16kHz frames  ┌────────────────┐   realtimeInput   ┌──────────┐
//! │   Mic    │ ─────────────▶ │                │ ────────────────▶ │          │
//! └──────────┘                │  LiveSession   │                   │  Remote  │
//! ┌──────────┐  24kHz gapless │ (lifecycle +   │   serverContent   │  voice   │
//! │ Speaker  │ ◀───────────── │  transcript)   │ ◀──────────────── │  model   │
//! └──────────┘                └────────────────┘                   └──────────┘
//! ```

pub mod config;
pub mod error;
pub mod genai;
pub mod live;
pub mod podcast;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use genai::{GenAiClient, NewsBriefing, Source};
pub use live::{LiveSession, SessionState, SessionStatus, Transcript, TranscriptEntry};
