//! Duplex channel to the remote voice endpoint
//!
//! Outbound audio flows through [`SessionChannel`], which queues units sent
//! before the remote acknowledged the session and flushes them in order once
//! it does. Inbound traffic arrives as an ordered stream of [`InboundEvent`]s.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::LiveConfig;
use crate::voice::TransportUnit;
use crate::{Error, Result};

/// One event from the remote session, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Streamed transcription of the user's speech
    PartialUserText(String),
    /// Streamed transcription of the model's spoken reply
    PartialModelText(String),
    /// Synthesized speech: base64 of 24kHz 16-bit little-endian PCM
    AudioFragment(String),
    /// The user barged in; pending reply audio should be dropped
    Interrupted,
    /// The current turn is finished
    TurnComplete,
    /// Transport failure; always followed by [`InboundEvent::Closed`]
    Error(String),
    /// The remote ended the session
    Closed,
}

/// Instruction for a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Write one audio unit to the wire
    Send(TransportUnit),
    /// Close the connection gracefully
    Close,
}

/// An established connection, as two unidirectional queues
#[derive(Debug)]
pub struct LiveLink {
    /// Commands for the connection's writer
    pub commands: mpsc::UnboundedSender<ChannelCommand>,
    /// Events read from the connection
    pub events: mpsc::Receiver<InboundEvent>,
}

/// Establishes connections to a live voice endpoint
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and complete the session handshake
    ///
    /// Resolves only once the remote has acknowledged the session setup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelOpen`] if the remote rejects or cannot be reached
    async fn connect(&self, config: &LiveConfig) -> Result<LiveLink>;
}

/// Observable state of a [`SessionChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Never opened
    Idle,
    /// Waiting for the remote to acknowledge; sends are queued
    Pending,
    /// Sends go straight to the connection
    Open,
    /// Closed; sends are dropped
    Closed,
}

#[derive(Debug)]
enum ChannelState {
    Idle,
    Pending(VecDeque<TransportUnit>),
    Open(mpsc::UnboundedSender<ChannelCommand>),
    Closed,
}

/// Outbound half of one logical session with the remote endpoint
///
/// Cheap to clone; clones share state, so the capture pump can send while the
/// session controller retains the ability to close.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl Default for SessionChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState::Idle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // The state is a plain enum; a panic mid-update cannot leave it torn
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Connect through `connector` and return the inbound event stream
    ///
    /// While the connection is being established the channel is `Pending`
    /// and queues sends. The configured connect timeout applies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelOpen`] if the connection fails, times out, or
    /// the channel was closed while connecting
    pub async fn open(
        &self,
        connector: &dyn LiveConnector,
        config: &LiveConfig,
    ) -> Result<mpsc::Receiver<InboundEvent>> {
        {
            let mut state = self.lock();
            match &*state {
                ChannelState::Idle => *state = ChannelState::Pending(VecDeque::new()),
                ChannelState::Pending(_) | ChannelState::Open(_) => {
                    return Err(Error::ChannelOpen("channel already opened".to_string()));
                }
                ChannelState::Closed => {
                    return Err(Error::ChannelOpen("channel closed".to_string()));
                }
            }
        }

        let connecting = connector.connect(config);
        let result = match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .unwrap_or_else(|_| {
                    Err(Error::ChannelOpen(format!(
                        "no response from remote within {}s",
                        limit.as_secs()
                    )))
                }),
            None => connecting.await,
        };

        let link = match result {
            Ok(link) => link,
            Err(e) => {
                *self.lock() = ChannelState::Closed;
                return Err(match e {
                    Error::ChannelOpen(_) => e,
                    other => Error::ChannelOpen(other.to_string()),
                });
            }
        };

        if self.mark_open(link.commands) {
            Ok(link.events)
        } else {
            Err(Error::ChannelOpen(
                "channel closed while connecting".to_string(),
            ))
        }
    }

    /// Switch to `Open`, flushing queued units to `commands` in send order
    ///
    /// Returns `false` (and closes `commands`) if the channel was closed
    /// while pending.
    fn mark_open(&self, commands: mpsc::UnboundedSender<ChannelCommand>) -> bool {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, ChannelState::Closed) {
            ChannelState::Pending(queue) => {
                let flushed = queue.len();
                for unit in queue {
                    if commands.send(ChannelCommand::Send(unit)).is_err() {
                        return false;
                    }
                }
                if flushed > 0 {
                    tracing::debug!(units = flushed, "flushed queued audio");
                }
                *state = ChannelState::Open(commands);
                true
            }
            _ => {
                let _ = commands.send(ChannelCommand::Close);
                false
            }
        }
    }

    /// Enqueue one unit for the remote
    ///
    /// Queued while pending, forwarded while open. Returns `false` when the
    /// unit was dropped because the channel is idle or closed.
    pub fn send(&self, unit: TransportUnit) -> bool {
        let mut state = self.lock();
        match &mut *state {
            ChannelState::Pending(queue) => {
                queue.push_back(unit);
                true
            }
            ChannelState::Open(commands) => {
                if commands.send(ChannelCommand::Send(unit)).is_ok() {
                    true
                } else {
                    tracing::debug!("connection writer gone, closing channel");
                    *state = ChannelState::Closed;
                    false
                }
            }
            ChannelState::Idle | ChannelState::Closed => false,
        }
    }

    /// Request graceful shutdown; idempotent
    ///
    /// Closing a channel that was never opened makes any later
    /// [`open`](Self::open) fail without connecting.
    pub fn close(&self) {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, ChannelState::Closed) {
            ChannelState::Open(commands) => {
                let _ = commands.send(ChannelCommand::Close);
                tracing::debug!("channel closed");
            }
            ChannelState::Pending(queue) => {
                tracing::debug!(dropped = queue.len(), "channel closed before open");
            }
            ChannelState::Idle | ChannelState::Closed => {}
        }
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        match &*self.lock() {
            ChannelState::Idle => ChannelStatus::Idle,
            ChannelState::Pending(_) => ChannelStatus::Pending,
            ChannelState::Open(_) => ChannelStatus::Open,
            ChannelState::Closed => ChannelStatus::Closed,
        }
    }

    /// Units waiting for the connection to open
    #[must_use]
    pub fn queued(&self) -> usize {
        match &*self.lock() {
            ChannelState::Pending(queue) => queue.len(),
            _ => 0,
        }
    }
}
