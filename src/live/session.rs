//! Live conversation lifecycle
//!
//! [`LiveSession`] owns every resource of a running conversation (microphone,
//! output clock, remote channel, background tasks) in a single
//! [`ActiveSession`] value. Releasing that value releases all of them, which
//! is how explicit stop, remote close, transport errors and disposal all share
//! one teardown path.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──remote open──▶ Connected
//!      ▲                      │                           │
//!      │                    error                stop / close / error
//!      │                      ▼                           │
//!      └──dismiss / start── Error          Disconnected ◀─┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument as _;
use uuid::Uuid;

use super::channel::{InboundEvent, LiveConnector, SessionChannel};
use super::gemini::GeminiConnector;
use super::transcript::{Transcript, TranscriptAggregator, TranscriptEntry};
use crate::config::{Config, LiveConfig};
use crate::voice::{
    AudioDevices, AudioFrame, AudioInput, CpalDevices, OUTPUT_SAMPLE_RATE, OutputSink,
    PlaybackScheduler, TransportUnit,
};
use crate::{Error, Result};

/// Shown when a session cannot be started
pub const START_FAILURE_MESSAGE: &str =
    "Could not access microphone or start session. Please check permissions.";

/// Shown when a running session fails
pub const CONNECTION_ERROR_MESSAGE: &str = "A connection error occurred.";

/// Shown when the speaker fails mid-session
pub const PLAYBACK_ERROR_MESSAGE: &str = "Audio playback failed.";

/// Lifecycle state of a live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Everything the UI observes about a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub transcript: Transcript,
    /// Human-readable message of the last failure
    pub error: Option<String>,
}

/// Controller for live voice conversations
///
/// Cheap to clone; all clones control the same session. Dropping the last
/// clone tears down any running session.
#[derive(Clone)]
pub struct LiveSession {
    shared: Arc<Shared>,
}

struct Shared {
    config: LiveConfig,
    connector: Arc<dyn LiveConnector>,
    devices: Arc<dyn AudioDevices>,
    status: watch::Sender<SessionStatus>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Bumped on every start and every teardown; work tagged with an older
    /// generation must not touch the session
    generation: u64,
    active: Option<ActiveSession>,
}

/// Resources held by one running session
struct ActiveSession {
    id: Uuid,
    channel: SessionChannel,
    input: Option<Box<dyn AudioInput>>,
    output: Option<Arc<dyn OutputSink>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: SessionChannel::new(),
            input: None,
            output: None,
            tasks: Vec::new(),
        }
    }

    /// Release every held resource; each step runs at most once
    fn release(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.stop();
        }
        self.channel.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(output) = self.output.take() {
            output.close();
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.release();
        tracing::debug!(session = %self.id, "live session resources released");
    }
}

impl LiveSession {
    /// Create a controller over the given transport and devices
    #[must_use]
    pub fn new(
        config: LiveConfig,
        connector: Arc<dyn LiveConnector>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                devices,
                status: watch::Sender::new(SessionStatus::default()),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Create a controller for the Gemini Live API and the default devices
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?.clone();
        Ok(Self::new(
            config.live.clone(),
            Arc::new(GeminiConnector::new(api_key)),
            Arc::new(CpalDevices),
        ))
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Snapshot of the current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.status.borrow().state
    }

    /// Start a conversation
    ///
    /// A no-op while connecting or connected. Clears the transcript, acquires
    /// the microphone and speaker, opens the remote channel and, once the
    /// remote acknowledges, starts streaming microphone audio. Any failure
    /// releases everything and moves to [`SessionState::Error`].
    ///
    /// A concurrent [`stop`](Self::stop) wins: this returns `Ok(())` without
    /// leaving anything held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`], [`Error::Audio`] or
    /// [`Error::ChannelOpen`] when the session could not be established
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;

        let (generation, channel, session_id, previous) = {
            let mut inner = shared.lock_inner();
            let state = shared.status.borrow().state;
            if matches!(state, SessionState::Connecting | SessionState::Connected) {
                tracing::debug!(%state, "live session already active");
                return Ok(());
            }

            let previous = inner.active.take();
            inner.generation += 1;
            let active = ActiveSession::new();
            let ids = (inner.generation, active.channel.clone(), active.id);
            inner.active = Some(active);

            shared.status.send_modify(|s| {
                s.state = SessionState::Connecting;
                s.error = None;
                s.transcript = Transcript::new();
            });
            (ids.0, ids.1, ids.2, previous)
        };
        drop(previous);

        let span = tracing::info_span!("live_session", id = %session_id);
        async move {
            tracing::info!("starting live session");

            let input = match shared.devices.open_input(shared.config.frame_size) {
                Ok(input) => input,
                Err(e) => return Err(shared.fail(generation, e)),
            };
            let output = match shared.devices.open_output(OUTPUT_SAMPLE_RATE) {
                Ok(output) => output,
                Err(e) => {
                    drop(input);
                    return Err(shared.fail(generation, e));
                }
            };

            let unclaimed = {
                let mut inner = shared.lock_inner();
                if let Some(active) = inner.current(generation) {
                    active.input = Some(input);
                    active.output = Some(Arc::clone(&output));
                    None
                } else {
                    Some(input)
                }
            };
            if let Some(mut input) = unclaimed {
                tracing::debug!("stopped while acquiring devices");
                input.stop();
                output.close();
                return Ok(());
            }

            let events = match channel
                .open(shared.connector.as_ref(), &shared.config)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    if shared.is_current(generation) {
                        return Err(shared.fail(generation, e));
                    }
                    tracing::debug!("stopped while connecting");
                    return Ok(());
                }
            };

            let started = {
                let mut inner = shared.lock_inner();
                match inner.current(generation) {
                    Some(active) => {
                        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
                        let capture = match active.input.as_mut() {
                            Some(input) => input.start(frames_tx),
                            None => Err(Error::DeviceUnavailable(
                                "microphone released".to_string(),
                            )),
                        };
                        match capture {
                            Ok(()) => {
                                let scheduler = PlaybackScheduler::new(
                                    output,
                                    shared.config.max_consecutive_decode_failures,
                                );
                                let span = tracing::Span::current();
                                active.tasks.push(tokio::spawn(
                                    run_capture_pump(frames_rx, channel.clone())
                                        .instrument(span.clone()),
                                ));
                                active.tasks.push(tokio::spawn(
                                    run_inbound(
                                        Arc::downgrade(shared),
                                        generation,
                                        events,
                                        scheduler,
                                    )
                                    .instrument(span),
                                ));
                                shared
                                    .status
                                    .send_modify(|s| s.state = SessionState::Connected);
                                Ok(true)
                            }
                            Err(e) => Err(e),
                        }
                    }
                    None => Ok(false),
                }
            };

            match started {
                Ok(true) => {
                    tracing::info!("live session connected");
                    Ok(())
                }
                Ok(false) => {
                    tracing::debug!("stopped before capture started");
                    Ok(())
                }
                Err(e) => Err(shared.fail(generation, e)),
            }
        }
        .instrument(span)
        .await
    }

    /// Stop the conversation and release every resource
    ///
    /// Idempotent and safe from any state, including while
    /// [`start`](Self::start) is in flight. Keeps the last error message.
    pub fn stop(&self) {
        drop(self.shared.teardown(None, None));
    }

    /// Acknowledge a failed start, returning to `Disconnected`
    pub fn dismiss(&self) {
        let _inner = self.shared.lock_inner();
        self.shared.status.send_if_modified(|s| {
            if s.state == SessionState::Error {
                s.state = SessionState::Disconnected;
                s.error = None;
                true
            } else {
                false
            }
        });
    }
}

impl Inner {
    /// The active session, if it still belongs to `generation`
    fn current(&mut self, generation: u64) -> Option<&mut ActiveSession> {
        if self.generation == generation {
            self.active.as_mut()
        } else {
            None
        }
    }
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave handles half-released:
        // every release step is an `Option::take`
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_inner().generation == generation
    }

    /// Abort a start attempt: release everything and enter `Error`
    fn fail(&self, generation: u64, error: Error) -> Error {
        let active = {
            let mut inner = self.lock_inner();
            if inner.generation != generation {
                return error;
            }
            inner.generation += 1;
            let active = inner.active.take();
            self.status.send_modify(|s| {
                s.state = SessionState::Error;
                s.error = Some(START_FAILURE_MESSAGE.to_string());
            });
            active
        };
        drop(active);
        tracing::error!(error = %error, "failed to start live session");
        error
    }

    /// Return to `Disconnected`, handing back the session to release
    ///
    /// With `only` set, does nothing unless that generation is still current,
    /// so a finished session's tasks cannot tear down its successor.
    #[must_use]
    fn teardown(&self, only: Option<u64>, message: Option<&str>) -> Option<ActiveSession> {
        let active = {
            let mut inner = self.lock_inner();
            if only.is_some_and(|g| g != inner.generation) {
                return None;
            }
            inner.generation += 1;
            let active = inner.active.take();
            self.status.send_modify(|s| {
                s.state = SessionState::Disconnected;
                if let Some(message) = message {
                    s.error = Some(message.to_string());
                }
            });
            active
        };
        if let Some(active) = &active {
            tracing::info!(session = %active.id, "live session stopped");
        }
        active
    }

    /// Tear down from one of the session's own tasks
    ///
    /// Stopping the devices joins their threads, so the release runs on the
    /// blocking pool instead of a runtime worker.
    fn finish(&self, generation: u64, message: Option<&str>) {
        if let Some(active) = self.teardown(Some(generation), message) {
            tokio::task::spawn_blocking(move || drop(active));
        }
    }

    fn append_transcript(&self, generation: u64, entry: TranscriptEntry) {
        let inner = self.lock_inner();
        if inner.generation == generation {
            self.status.send_modify(|s| s.transcript.push(entry));
        }
    }
}

/// Encode captured frames and hand them to the channel, in capture order
async fn run_capture_pump(
    mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    channel: SessionChannel,
) {
    let mut sent: u64 = 0;
    while let Some(frame) = frames.recv().await {
        if !channel.send(TransportUnit::from_frame(&frame)) {
            tracing::debug!("channel closed, stopping capture pump");
            break;
        }
        sent += 1;
    }
    tracing::debug!(frames = sent, "capture pump finished");
}

/// Route inbound events to playback and the transcript until the session ends
async fn run_inbound(
    shared: Weak<Shared>,
    generation: u64,
    mut events: mpsc::Receiver<InboundEvent>,
    mut scheduler: PlaybackScheduler,
) {
    let mut aggregator = TranscriptAggregator::new();

    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };

        match event {
            InboundEvent::AudioFragment(payload) => match scheduler.schedule_fragment(&payload) {
                Ok(fragment) => tracing::trace!(
                    start = fragment.start,
                    frames = fragment.frames,
                    "scheduled audio fragment"
                ),
                Err(Error::Decode(reason)) => {
                    tracing::warn!(%reason, "dropping undecodable audio fragment");
                }
                Err(e @ Error::Transport(_)) => {
                    tracing::error!(error = %e, "audio stream unhealthy");
                    shared.finish(generation, Some(CONNECTION_ERROR_MESSAGE));
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "audio playback failed");
                    shared.finish(generation, Some(PLAYBACK_ERROR_MESSAGE));
                    return;
                }
            },
            InboundEvent::Interrupted => scheduler.interrupt(),
            InboundEvent::Error(message) => {
                tracing::error!(%message, "live session transport error");
                shared.finish(generation, Some(CONNECTION_ERROR_MESSAGE));
                return;
            }
            InboundEvent::Closed => {
                tracing::info!("remote closed live session");
                shared.finish(generation, None);
                return;
            }
            other => {
                if let Some(entry) = aggregator.apply(&other) {
                    tracing::debug!(user = %entry.user, model = %entry.model, "turn complete");
                    shared.append_transcript(generation, entry);
                }
            }
        }
    }

    // Reader went away without a close event
    if let Some(shared) = shared.upgrade() {
        shared.finish(generation, None);
    }
}
