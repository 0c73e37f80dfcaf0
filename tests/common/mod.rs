//! Shared test utilities
//!
//! In-memory devices and transport so live sessions run without audio
//! hardware or network.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use newscast::config::LiveConfig;
use newscast::live::{ChannelCommand, InboundEvent, LiveConnector, LiveLink, SessionStatus};
use newscast::voice::{AudioDevices, AudioFrame, AudioInput, FrameSender, OutputSink};
use newscast::{Error, LiveSession, Result};

/// How long to wait for asynchronous effects before failing a test
pub const WAIT: Duration = Duration::from_secs(2);

/// Poll `check` until it holds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Wait until the session status satisfies `predicate`
pub async fn wait_for_status(
    session: &LiveSession,
    predicate: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    let mut rx = session.subscribe();
    let status = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for session status")
        .expect("session status channel closed");
    status.clone()
}

/// Await `fut` with the test timeout
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("operation timed out")
}

/// Live configuration suitable for tests
#[must_use]
pub fn test_config() -> LiveConfig {
    LiveConfig {
        frame_size: 4,
        connect_timeout: None,
        ..LiveConfig::default()
    }
}

/// Observable state of one acquired fake microphone
#[derive(Default)]
pub struct InputProbe {
    frames: Mutex<Option<FrameSender>>,
    pub started: AtomicUsize,
    pub released: AtomicBool,
    release_gate: Mutex<Option<std_mpsc::Receiver<()>>>,
}

impl InputProbe {
    /// Deliver a frame as if the microphone produced it
    ///
    /// Returns `false` if the microphone is not capturing.
    pub fn emit(&self, samples: Vec<f32>) -> bool {
        self.frames
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(AudioFrame::new(samples)).is_ok())
    }

    pub fn is_capturing(&self) -> bool {
        self.frames.lock().unwrap().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Make the next stop block its thread until the returned sender fires
    /// (or the test timeout passes), like a device thread slow to join
    pub fn hold_release(&self) -> std_mpsc::Sender<()> {
        let (tx, rx) = std_mpsc::channel();
        *self.release_gate.lock().unwrap() = Some(rx);
        tx
    }
}

pub struct FakeInput {
    probe: Arc<InputProbe>,
}

impl AudioInput for FakeInput {
    fn start(&mut self, frames: FrameSender) -> Result<()> {
        let mut slot = self.probe.frames.lock().unwrap();
        if slot.is_none() {
            *slot = Some(frames);
            self.probe.started.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) {
        let gate = self.probe.release_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(WAIT);
        }
        self.probe.frames.lock().unwrap().take();
        self.probe.released.store(true, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.probe.is_capturing()
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Speaker with a hand-driven clock that records what was scheduled
#[derive(Default)]
pub struct FakeOutput {
    pub clock: AtomicU64,
    pub scheduled: Mutex<Vec<(u64, usize)>>,
    pub cleared: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeOutput {
    pub fn scheduled(&self) -> Vec<(u64, usize)> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl OutputSink for FakeOutput {
    fn sample_rate(&self) -> u32 {
        24000
    }

    fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn schedule(&self, start: u64, samples: Vec<f32>) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::Audio("output closed".to_string()));
        }
        self.scheduled.lock().unwrap().push((start, samples.len()));
        Ok(start)
    }

    fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Device factory handing out fakes and keeping probes for inspection
#[derive(Default)]
pub struct FakeDevices {
    pub mic_unavailable: AtomicBool,
    inputs: Mutex<Vec<Arc<InputProbe>>>,
    outputs: Mutex<Vec<Arc<FakeOutput>>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Most recently acquired microphone
    pub fn input(&self) -> Arc<InputProbe> {
        Arc::clone(self.inputs.lock().unwrap().last().expect("no input opened"))
    }

    /// Most recently acquired speaker
    pub fn output(&self) -> Arc<FakeOutput> {
        Arc::clone(self.outputs.lock().unwrap().last().expect("no output opened"))
    }

    pub fn inputs_opened(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn outputs_opened(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }
}

impl AudioDevices for FakeDevices {
    fn open_input(&self, _frame_size: usize) -> Result<Box<dyn AudioInput>> {
        if self.mic_unavailable.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("permission denied".to_string()));
        }
        let probe = Arc::new(InputProbe::default());
        self.inputs.lock().unwrap().push(Arc::clone(&probe));
        Ok(Box::new(FakeInput { probe }))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Arc<dyn OutputSink>> {
        let output = Arc::new(FakeOutput::default());
        self.outputs.lock().unwrap().push(Arc::clone(&output));
        Ok(output)
    }
}

/// The remote side of one fake connection
pub struct RemoteEnd {
    pub commands: mpsc::UnboundedReceiver<ChannelCommand>,
    pub events: mpsc::Sender<InboundEvent>,
}

impl RemoteEnd {
    pub async fn send(&self, event: InboundEvent) {
        self.events
            .send(event)
            .await
            .expect("session stopped reading events");
    }

    /// Next command from the session, or `None` once the session let go
    pub async fn next_command(&mut self) -> Option<ChannelCommand> {
        within(self.commands.recv()).await
    }
}

/// Connector whose connections are driven by the test
#[derive(Default)]
pub struct FakeConnector {
    pub fail: AtomicBool,
    pub gated: AtomicBool,
    pub attempts: AtomicUsize,
    release: Notify,
    remotes: Mutex<Vec<RemoteEnd>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold every connect until [`FakeConnector::release`]
    pub fn gated() -> Arc<Self> {
        let connector = Self::default();
        connector.gated.store(true, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Take the remote end of the most recent connection
    pub fn remote(&self) -> RemoteEnd {
        self.remotes.lock().unwrap().pop().expect("no connection made")
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, _config: &LiveConfig) -> Result<LiveLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ChannelOpen("remote rejected setup".to_string()));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(64);
        self.remotes.lock().unwrap().push(RemoteEnd {
            commands: commands_rx,
            events: events_tx,
        });
        Ok(LiveLink {
            commands: commands_tx,
            events: events_rx,
        })
    }
}

/// A session over fresh fakes
pub fn fake_session(config: LiveConfig) -> (LiveSession, Arc<FakeConnector>, Arc<FakeDevices>) {
    let connector = FakeConnector::new();
    let devices = FakeDevices::new();
    let session = LiveSession::new(config, connector.clone(), devices.clone());
    (session, connector, devices)
}
