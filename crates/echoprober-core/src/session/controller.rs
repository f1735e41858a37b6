//! Session controller
//!
//! [`SessionController`] is the single owner and writer of the session state.
//! User actions are method calls; asynchronous producers (the auto-stop
//! timer and the motion sensors) never touch the state directly but post a
//! [`ControlMessage`] to the controller's inbox, which is drained by
//! [`SessionController::process_pending`] and at the start of every action.
//!
//! Captured audio does not pass through the inbox: in online mode the capture
//! callback submits buffers straight into a [`ConversionPipeline`] whose sink
//! is the network connection, and in offline mode the [`FileCapture`]
//! collaborator owns the whole capture-to-file path.

use super::io::{CaptureSource, Collaborators, FileCapture, PlaybackSink};
use super::state::{SessionMode, SessionSnapshot, SessionState};
use super::storage::SessionStorage;
use super::timer::AutoStopTimer;
use crate::audio::convert::{ConversionPipeline, FormatConverter};
use crate::audio::signal::ProbeWaveform;
use crate::audio::wav::WavBuffer;
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::event::{EventSender, ProbeEvent};
use crate::motion::{MotionReading, MotionRecorder, TimedReading};
use crate::net::framer::NetworkClient;
use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};

/// Text command sent to the peer when an online session starts
pub const START_COMMAND: &str = "start";

/// Messages asynchronous producers post to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// The auto-stop task armed as `generation` elapsed
    TimerElapsed { generation: u64 },
    Motion(TimedReading),
}

/// Handle sensor callbacks use to post readings
#[derive(Clone)]
pub struct MotionFeed {
    tx: Sender<ControlMessage>,
}

impl MotionFeed {
    /// Post a reading taken at `timestamp` seconds (any monotonic clock)
    pub fn push(&self, timestamp: f64, reading: MotionReading) {
        let _ = self
            .tx
            .send(ControlMessage::Motion(TimedReading { timestamp, reading }));
    }
}

struct OfflineSession {
    name: String,
    audio_path: Option<PathBuf>,
}

/// Owns the playback/capture lifecycle and the online/offline state machine
pub struct SessionController {
    config: ProbeConfig,
    state: SessionState,
    capture: Box<dyn CaptureSource>,
    playback: Box<dyn PlaybackSink>,
    file_capture: Box<dyn FileCapture>,
    converter: FormatConverter,
    probe: WavBuffer,
    storage: SessionStorage,
    client: Option<NetworkClient>,
    pipeline: Option<ConversionPipeline>,
    timer: AutoStopTimer,
    timer_firings: u64,
    motion: MotionRecorder,
    requested_name: Option<String>,
    offline: Option<OfflineSession>,
    inbox_tx: Sender<ControlMessage>,
    inbox_rx: Receiver<ControlMessage>,
    events_tx: EventSender,
    events_rx: Receiver<ProbeEvent>,
}

impl SessionController {
    /// Synthesize the probe waveform and hand it to the playback sink
    ///
    /// Fails when the waveform parameters are invalid or the playback sink
    /// cannot be prepared; the controller is unusable in either case.
    pub fn new(config: ProbeConfig, collaborators: Collaborators) -> Result<Self, ProbeError> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self::with_events(config, collaborators, events_tx, events_rx)
    }

    /// Like [`Self::new`], sharing an event channel the collaborators also report to
    pub fn with_events(
        config: ProbeConfig,
        collaborators: Collaborators,
        events_tx: EventSender,
        events_rx: Receiver<ProbeEvent>,
    ) -> Result<Self, ProbeError> {
        config.validate()?;
        let converter = FormatConverter::new(config.wire)?;

        let waveform = ProbeWaveform::synthesize(&config.waveform)?;
        let probe = waveform.to_wav(
            config.waveform.left.volume,
            config.waveform.right.volume,
        )?;
        tracing::info!(
            samples = waveform.len(),
            seconds = waveform.seconds(),
            bytes = probe.len(),
            "Probe waveform synthesized"
        );

        let Collaborators {
            capture,
            mut playback,
            file_capture,
        } = collaborators;
        playback.prepare(&probe)?;

        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        let storage = SessionStorage::new(config.storage_dir.clone());

        Ok(Self {
            config,
            state: SessionState::Idle,
            capture,
            playback,
            file_capture,
            converter,
            probe,
            storage,
            client: None,
            pipeline: None,
            timer: AutoStopTimer::new(),
            timer_firings: 0,
            motion: MotionRecorder::new(),
            requested_name: None,
            offline: None,
            inbox_tx,
            inbox_rx,
            events_tx,
            events_rx,
        })
    }

    /// Event stream for the presentation layer (one subscriber)
    pub fn events(&self) -> Receiver<ProbeEvent> {
        self.events_rx.clone()
    }

    /// Sender that collaborators may use to report their own events
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Sender for posting raw control messages
    pub fn control_sender(&self) -> Sender<ControlMessage> {
        self.inbox_tx.clone()
    }

    pub fn motion_feed(&self) -> MotionFeed {
        MotionFeed {
            tx: self.inbox_tx.clone(),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.client.as_ref().map(|c| c.is_connected()).unwrap_or(false)
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Number of auto-stop firings that actually stopped a session
    pub fn timer_firings(&self) -> u64 {
        self.timer_firings
    }

    pub fn motion(&self) -> &MotionRecorder {
        &self.motion
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    /// The encoded probe handed to the playback sink
    pub fn probe(&self) -> &WavBuffer {
        &self.probe
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (converted, dropped) = self
            .pipeline
            .as_ref()
            .map(|p| (p.stats().converted(), p.stats().dropped()))
            .unwrap_or((0, 0));
        SessionSnapshot {
            state: self.state,
            connected: self.is_connected(),
            timer_armed: self.timer.is_armed(),
            session_name: self
                .offline
                .as_ref()
                .map(|o| o.name.clone())
                .or_else(|| self.requested_name.clone()),
            motion_columns: self.motion.column_lengths(),
            frames_converted: converted,
            frames_dropped: dropped,
        }
    }

    /// Name for the next offline session; `None` means a timestamp name
    pub fn set_session_name(&mut self, name: Option<String>) {
        self.requested_name = name;
    }

    /// Connect to the configured host and port
    pub fn connect(&mut self) -> Result<(), ProbeError> {
        let host = self.config.host.clone();
        let port = self.config.port;
        self.connect_to(&host, port)
    }

    /// Single connection attempt; a no-op while already connected
    pub fn connect_to(&mut self, host: &str, port: u16) -> Result<(), ProbeError> {
        self.process_pending();
        if self.is_connected() {
            return Ok(());
        }
        // Peer-closed connection still holds its threads
        if let Some(mut stale) = self.client.take() {
            stale.disconnect();
        }

        let addr = format!("{}:{}", host, port);
        self.emit(ProbeEvent::Connecting { addr: addr.clone() });
        match NetworkClient::connect(host, port, &self.config.framer_options(), self.events_tx.clone()) {
            Ok(client) => {
                self.client = Some(client);
                self.emit(ProbeEvent::Connected { addr });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "Connection failed");
                self.emit(ProbeEvent::ConnectFailed {
                    addr,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stop any running session, then close the connection
    pub fn disconnect(&mut self) {
        self.process_pending();
        if self.client.is_none() {
            return;
        }
        if self.state.is_playing() {
            self.stop_session(false);
        }
        if let Some(mut client) = self.client.take() {
            client.disconnect();
            self.emit(ProbeEvent::Disconnected);
        }
    }

    /// Send a free-text command over the connection
    pub fn send_text(&mut self, text: &str) -> Result<(), ProbeError> {
        let result = match &self.client {
            Some(client) if client.is_connected() => client.send_text(text),
            _ => Err(ProbeError::NotConnected),
        };
        if let Err(e) = &result {
            self.emit(ProbeEvent::SendFailed {
                reason: e.to_string(),
            });
        }
        result
    }

    /// Start a session: online when connected, offline otherwise
    pub fn start(&mut self) -> Result<SessionState, ProbeError> {
        self.process_pending();
        if self.state.is_playing() {
            return Err(ProbeError::InvalidTransition {
                action: "start",
                state: self.state.name(),
            });
        }

        if self.is_connected() {
            self.start_online()?;
        } else {
            self.start_offline()?;
        }
        Ok(self.state)
    }

    /// Stop the running session; returns false when already idle
    pub fn stop(&mut self) -> bool {
        self.process_pending();
        if self.state.is_idle() {
            return false;
        }
        self.stop_session(false);
        true
    }

    /// Start when idle, stop when playing
    pub fn toggle(&mut self) -> Result<SessionState, ProbeError> {
        self.process_pending();
        if self.state.is_playing() {
            self.stop_session(false);
            Ok(self.state)
        } else {
            self.start()
        }
    }

    /// Apply every message posted so far; returns how many were handled
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.inbox_rx.try_recv() {
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    /// Block until a control message arrives or `timeout` elapses, then drain the inbox
    pub fn wait_pending(&mut self, timeout: std::time::Duration) -> usize {
        match self.inbox_rx.recv_timeout(timeout) {
            Ok(msg) => {
                self.handle(msg);
                1 + self.process_pending()
            }
            Err(_) => 0,
        }
    }

    fn handle(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::TimerElapsed { generation } => self.on_timer(generation),
            ControlMessage::Motion(reading) => {
                if self.state.is_playing() {
                    self.motion.record(reading);
                }
            }
        }
    }

    /// Write the synthesized probe to `path` as a WAV file
    pub fn write_probe_wav(&self, path: &Path) -> Result<(), ProbeError> {
        self.probe.write_to(path)?;
        self.emit(ProbeEvent::FileWritten {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn start_online(&mut self) -> Result<(), ProbeError> {
        let sink = match &self.client {
            Some(client) => client.frame_sink()?,
            None => return Err(ProbeError::NotConnected),
        };

        let mut pipeline = ConversionPipeline::start(self.converter.clone(), sink, self.events_tx.clone());
        let Some(submitter) = pipeline.submitter() else {
            return Err(ProbeError::Device("conversion pipeline not running".into()));
        };
        if let Err(e) = self.capture.start(Box::new(move |buffer| {
            submitter.submit(buffer);
        })) {
            pipeline.stop();
            self.report_device_error(&e);
            return Err(e);
        }

        if let Err(e) = self.playback.play() {
            self.capture.stop();
            pipeline.stop();
            self.report_device_error(&e);
            return Err(e);
        }

        self.pipeline = Some(pipeline);
        self.motion.clear();
        self.state = SessionState::OnlinePlaying;
        tracing::info!("Online session started");

        // Failure here is already reported as an event
        let _ = self.send_text(START_COMMAND);
        self.emit(ProbeEvent::Started {
            mode: SessionMode::Online,
            session_name: None,
        });
        Ok(())
    }

    fn start_offline(&mut self) -> Result<(), ProbeError> {
        let name = self
            .storage
            .session_name(self.requested_name.as_deref(), chrono::Local::now());

        let audio_path = match self.storage.ensure_dir() {
            Ok(()) => {
                let path = self.storage.audio_path(&name);
                match self.file_capture.start(&path) {
                    Ok(()) => Some(path),
                    Err(e @ ProbeError::File { .. }) => {
                        self.report_file_error(&path, &e);
                        None
                    }
                    Err(e) => {
                        self.report_device_error(&e);
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                self.report_file_error(self.storage.dir(), &e);
                None
            }
        };

        if let Err(e) = self.playback.play() {
            if audio_path.is_some() {
                let _ = self.file_capture.stop();
            }
            self.report_device_error(&e);
            return Err(e);
        }

        if let Some(after) = self.config.auto_stop_for(&name) {
            let tx = self.inbox_tx.clone();
            let generation = self.timer.arm(after, move |generation| {
                let _ = tx.send(ControlMessage::TimerElapsed { generation });
            });
            tracing::info!(session = %name, generation, seconds = after.as_secs(), "Auto-stop armed");
            self.emit(ProbeEvent::TimerArmed {
                seconds: after.as_secs(),
            });
        }

        self.motion.clear();
        self.requested_name = None;
        self.state = SessionState::OfflinePlaying;
        tracing::info!(session = %name, "Offline session started");
        self.emit(ProbeEvent::Started {
            mode: SessionMode::Offline,
            session_name: Some(name.clone()),
        });
        self.offline = Some(OfflineSession { name, audio_path });
        Ok(())
    }

    fn on_timer(&mut self, generation: u64) {
        if !self.timer.claim(generation) {
            tracing::debug!(generation, "Ignoring stale auto-stop firing");
            return;
        }
        if self.state != SessionState::OfflinePlaying {
            return;
        }
        self.timer_firings += 1;
        self.emit(ProbeEvent::TimerFired);
        self.stop_session(true);
    }

    /// Shared stop sequence; always ends in Idle
    fn stop_session(&mut self, by_timer: bool) {
        match self.state {
            SessionState::Idle => return,
            SessionState::OnlinePlaying => {
                self.capture.stop();
                if let Some(mut pipeline) = self.pipeline.take() {
                    pipeline.stop();
                }
                self.playback.pause();
                self.motion.clear();
            }
            SessionState::OfflinePlaying => {
                self.timer.cancel();
                if let Some(session) = self.offline.take() {
                    self.finish_offline(session);
                }
                self.playback.pause();
            }
        }

        self.state = SessionState::Idle;
        tracing::info!(by_timer, "Session stopped");
        self.emit(ProbeEvent::Stopped { by_timer });
    }

    fn finish_offline(&mut self, session: OfflineSession) {
        if let Some(path) = session.audio_path {
            match self.file_capture.stop() {
                Ok(_) => self.emit(ProbeEvent::FileWritten { path }),
                Err(e) => self.report_file_error(&path, &e),
            }
        }

        let motion_path = self.storage.motion_path(&session.name);
        match self.motion.flush_to(&motion_path) {
            Ok(_) => self.emit(ProbeEvent::FileWritten { path: motion_path }),
            Err(e) => self.report_file_error(&motion_path, &e),
        }
    }

    fn report_device_error(&self, e: &ProbeError) {
        tracing::error!(error = %e, "Audio device unavailable");
        match e {
            ProbeError::PermissionDenied { subsystem } => self.emit(ProbeEvent::PermissionDenied {
                subsystem: *subsystem,
            }),
            other => self.emit(ProbeEvent::DeviceFailed {
                reason: other.to_string(),
            }),
        }
    }

    fn report_file_error(&self, path: &Path, e: &ProbeError) {
        tracing::warn!(path = %path.display(), error = %e, "Session file not written");
        self.emit(ProbeEvent::FileFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        });
    }

    fn emit(&self, event: ProbeEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state.is_playing() {
            self.stop_session(false);
        }
        if let Some(mut client) = self.client.take() {
            client.disconnect();
        }
    }
}
