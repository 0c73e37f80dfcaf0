//! WebSocket connector for the Gemini Live API
//!
//! A connection is split into a writer task, fed by [`ChannelCommand`]s, and
//! a reader task that turns server frames into [`InboundEvent`]s. A remote
//! close ends the reader with [`InboundEvent::Closed`]. A local close ends
//! the writer, which then aborts the reader without waiting for the
//! remote's reply.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::channel::{ChannelCommand, InboundEvent, LiveConnector, LiveLink};
use super::protocol::{ClientMessage, ServerMessage};
use crate::config::LiveConfig;
use crate::{Error, Result};

/// Inbound events buffered between the reader and the session
const EVENT_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connects to the live endpoint with an API key
pub struct GeminiConnector {
    api_key: SecretString,
}

impl GeminiConnector {
    #[must_use]
    pub const fn new(api_key: SecretString) -> Self {
        Self { api_key }
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<url::Url> {
        let mut url = url::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid live endpoint {endpoint:?}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn connect(&self, config: &LiveConfig) -> Result<LiveLink> {
        let url = self.endpoint_url(&config.endpoint)?;
        tracing::debug!(
            host = url.host_str().unwrap_or_default(),
            model = %config.model,
            "connecting to live endpoint"
        );

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let setup = serde_json::to_string(&ClientMessage::setup(config))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;
        await_setup_complete(&mut stream).await?;

        tracing::info!(model = %config.model, voice = %config.voice, "live session open");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(run_reader(stream, events_tx.clone()));
        tokio::spawn(run_writer(
            sink,
            commands_rx,
            events_tx,
            reader.abort_handle(),
        ));

        Ok(LiveLink {
            commands: commands_tx,
            events: events_rx,
        })
    }
}

/// Wait for `setupComplete`, ignoring anything else the server sends first
async fn await_setup_complete(stream: &mut WsSource) -> Result<()> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| Error::ChannelOpen(e.to_string()))?;
        if let Message::Close(frame) = &message {
            return Err(Error::ChannelOpen(format!(
                "remote closed during setup: {}",
                close_reason(frame.as_ref())
            )));
        }
        let Some(text) = frame_text(&message) else {
            continue;
        };
        match ServerMessage::parse(text) {
            Ok(msg) if msg.is_setup_complete() => return Ok(()),
            Ok(_) => tracing::debug!("ignoring message before setup complete"),
            Err(e) => tracing::warn!(error = %e, "unparseable message during setup"),
        }
    }
    Err(Error::ChannelOpen(
        "connection closed during setup".to_string(),
    ))
}

async fn run_writer(
    mut sink: WsSink,
    mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
    events: mpsc::Sender<InboundEvent>,
    reader: AbortHandle,
) {
    let mut sent: u64 = 0;

    while let Some(command) = commands.recv().await {
        match command {
            ChannelCommand::Send(unit) => {
                let frame = match serde_json::to_string(&ClientMessage::media(&unit)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode audio unit");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::error!(error = %e, "failed to send audio");
                    let _ = events.send(InboundEvent::Error(e.to_string())).await;
                    return;
                }
                sent += 1;
            }
            ChannelCommand::Close => break,
        }
    }

    // Close requested, or every command sender dropped
    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "close frame not sent");
    }
    let _ = sink.close().await;
    reader.abort();
    tracing::debug!(units = sent, "live writer finished");
}

async fn run_reader(mut stream: WsSource, events: mpsc::Sender<InboundEvent>) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                tracing::error!(error = %e, "live connection error");
                let _ = events.send(InboundEvent::Error(e.to_string())).await;
                break;
            }
        };

        if let Message::Close(frame) = &message {
            tracing::info!(reason = %close_reason(frame.as_ref()), "remote closed live session");
            break;
        }

        let Some(text) = frame_text(&message) else {
            continue;
        };

        let parsed = match ServerMessage::parse(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable server message");
                continue;
            }
        };

        if let Some(go_away) = &parsed.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "remote will end the session soon");
        }

        for event in parsed.into_events() {
            if events.send(event).await.is_err() {
                // Session already torn down
                return;
            }
        }
    }

    let _ = events.send(InboundEvent::Closed).await;
}

/// JSON payload of a text or binary frame
fn frame_text(message: &Message) -> Option<&str> {
    match message {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(data) => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

fn close_reason(frame: Option<&CloseFrame>) -> String {
    frame.map_or_else(
        || "no reason given".to_string(),
        |f| {
            if f.reason.is_empty() {
                f.code.to_string()
            } else {
                format!("{} ({})", f.reason.as_str(), f.code)
            }
        },
    )
}
