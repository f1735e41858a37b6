//! Contracts between the session controller and the platform
//!
//! The controller never talks to an audio API directly. It drives a
//! [`CaptureSource`] (microphone), a [`PlaybackSink`] (speaker) and a
//! [`FileCapture`] (offline recorder) through these traits, so a desktop
//! build can plug in cpal devices while tests plug in fakes.

use crate::audio::convert::CaptureBuffer;
use crate::audio::wav::WavBuffer;
use crate::error::ProbeError;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Called from the capture thread with each filled buffer
///
/// Must not block: hand the buffer off and return.
pub type CaptureCallback = Box<dyn FnMut(CaptureBuffer) + Send + 'static>;

/// Native capture format reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Microphone input
pub trait CaptureSource: Send {
    fn native_format(&self) -> Result<CaptureFormat, ProbeError>;

    /// Begin delivering buffers to `callback`
    fn start(&mut self, callback: CaptureCallback) -> Result<(), ProbeError>;

    /// Stop delivering; no callback runs after this returns
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Speaker output looping a prepared waveform
pub trait PlaybackSink: Send {
    /// Load the waveform; called once before the first `play`
    fn prepare(&mut self, wav: &WavBuffer) -> Result<(), ProbeError>;

    /// Start or resume looping from the current position
    fn play(&mut self) -> Result<(), ProbeError>;

    fn pause(&mut self);

    fn is_playing(&self) -> bool;
}

/// Records capture audio to a file for offline sessions
pub trait FileCapture: Send {
    fn start(&mut self, path: &Path) -> Result<(), ProbeError>;

    /// Finish the file; returns the number of audio bytes written
    fn stop(&mut self) -> Result<u64, ProbeError>;

    fn is_recording(&self) -> bool;
}

/// Collaborators handed to [`crate::session::controller::SessionController::new`]
pub struct Collaborators {
    pub capture: Box<dyn CaptureSource>,
    pub playback: Box<dyn PlaybackSink>,
    pub file_capture: Box<dyn FileCapture>,
}

/// Pushes buffers into a running [`ChannelCapture`]
#[derive(Clone)]
pub struct CaptureFeed {
    callback: Arc<Mutex<Option<CaptureCallback>>>,
}

impl CaptureFeed {
    /// Deliver `buffer` to the capture callback; returns false while stopped
    pub fn push(&self, buffer: CaptureBuffer) -> bool {
        let mut guard = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(callback) => {
                callback(buffer);
                true
            }
            None => false,
        }
    }
}

/// Capture source fed by hand through a [`CaptureFeed`]
///
/// Used for headless runs and for replaying recorded buffers.
pub struct ChannelCapture {
    format: CaptureFormat,
    callback: Arc<Mutex<Option<CaptureCallback>>>,
}

impl ChannelCapture {
    pub fn new(format: CaptureFormat) -> (Self, CaptureFeed) {
        let callback = Arc::new(Mutex::new(None));
        let feed = CaptureFeed {
            callback: Arc::clone(&callback),
        };
        (Self { format, callback }, feed)
    }
}

impl CaptureSource for ChannelCapture {
    fn native_format(&self) -> Result<CaptureFormat, ProbeError> {
        Ok(self.format)
    }

    fn start(&mut self, callback: CaptureCallback) -> Result<(), ProbeError> {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
        Ok(())
    }

    fn stop(&mut self) {
        self.callback.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn is_running(&self) -> bool {
        self.callback
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }
}

/// Playback sink with no output device
#[derive(Debug, Default)]
pub struct SilentPlayback {
    prepared_bytes: usize,
    playing: bool,
}

impl SilentPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepared_bytes(&self) -> usize {
        self.prepared_bytes
    }
}

impl PlaybackSink for SilentPlayback {
    fn prepare(&mut self, wav: &WavBuffer) -> Result<(), ProbeError> {
        self.prepared_bytes = wav.len();
        Ok(())
    }

    fn play(&mut self) -> Result<(), ProbeError> {
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}
