//! Session events for the presentation layer
//!
//! Every subsystem reports what happened as a [`ProbeEvent`] over a crossbeam
//! channel. How the events are rendered is up to the subscriber; [`EventLog`]
//! is the plain-text rendering the command-line client uses.

use crate::session::state::SessionMode;
use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

/// Sending half of the event stream
pub type EventSender = Sender<ProbeEvent>;

/// Something observable that happened during a session
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    Connecting { addr: String },
    Connected { addr: String },
    ConnectFailed { addr: String, reason: String },
    Disconnected,
    Started { mode: SessionMode, session_name: Option<String> },
    Stopped { by_timer: bool },
    TimerArmed { seconds: u64 },
    TimerFired,
    TextSent { text: String },
    FrameSent { bytes: usize },
    SendFailed { reason: String },
    TextReceived { text: String },
    DataReceived { bytes: usize },
    ReadFailed { reason: String },
    ConnectionClosed,
    FrameDropped { reason: String },
    FileWritten { path: PathBuf },
    FileFailed { path: PathBuf, reason: String },
    PermissionDenied { subsystem: &'static str },
    DeviceFailed { reason: String },
}

impl fmt::Display for ProbeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { addr } => write!(f, "Connecting to {}.", addr),
            Self::Connected { addr } => write!(f, "Connected to host {}", addr),
            Self::ConnectFailed { addr, reason } => {
                write!(f, "Connection to {} failed: {}", addr, reason)
            }
            Self::Disconnected => write!(f, "Disconnected."),
            Self::Started { mode, session_name } => match session_name {
                Some(name) => write!(f, "Started ({}, {}).", mode, name),
                None => write!(f, "Started ({}).", mode),
            },
            Self::Stopped { by_timer: true } => write!(f, "Stopped by timer."),
            Self::Stopped { by_timer: false } => write!(f, "Stopped."),
            Self::TimerArmed { seconds } => write!(f, "Auto-stop in {}s.", seconds),
            Self::TimerFired => write!(f, "Auto-stop timer fired."),
            Self::TextSent { text } => write!(f, "Text sent: {}", text),
            Self::FrameSent { bytes } => write!(f, "Data sent: {}", bytes),
            Self::SendFailed { reason } => write!(f, "Sending failed: {}", reason),
            Self::TextReceived { text } => write!(f, "{}", text),
            Self::DataReceived { bytes } => write!(f, "Data received: {}", bytes),
            Self::ReadFailed { reason } => write!(f, "Reading failed: {}", reason),
            Self::ConnectionClosed => write!(f, "Connection closed by peer."),
            Self::FrameDropped { reason } => write!(f, "Frame dropped: {}", reason),
            Self::FileWritten { path } => write!(f, "Saved {}", path.display()),
            Self::FileFailed { path, reason } => {
                write!(f, "Failed to write {}: {}", path.display(), reason)
            }
            Self::PermissionDenied { subsystem } => write!(f, "{} permission missing.", subsystem),
            Self::DeviceFailed { reason } => write!(f, "Audio device error: {}", reason),
        }
    }
}

/// Bounded, newest-first event log with `mm:ss` timestamps
#[derive(Debug)]
pub struct EventLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Record an event at the current local time
    pub fn push(&mut self, event: &ProbeEvent) -> &str {
        self.push_at(event, Local::now())
    }

    /// Record an event at an explicit time
    pub fn push_at(&mut self, event: &ProbeEvent, at: DateTime<Local>) -> &str {
        if self.lines.len() >= self.capacity {
            self.lines.pop_back();
        }
        self.lines
            .push_front(format!("{} {}", at.format("%M:%S"), event));
        &self.lines[0]
    }

    /// Lines, newest first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_display() {
        assert_eq!(
            ProbeEvent::FrameSent { bytes: 9600 }.to_string(),
            "Data sent: 9600"
        );
        assert_eq!(ProbeEvent::Stopped { by_timer: false }.to_string(), "Stopped.");
    }

    #[test]
    fn test_event_log_newest_first_and_bounded() {
        let mut log = EventLog::new(2);
        let at = Local.with_ymd_and_hms(2024, 1, 1, 12, 3, 4).unwrap();
        log.push_at(&ProbeEvent::Disconnected, at);
        log.push_at(&ProbeEvent::TimerFired, at);
        log.push_at(&ProbeEvent::ConnectionClosed, at);

        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "03:04 Connection closed by peer.");
        assert_eq!(lines[1], "03:04 Auto-stop timer fired.");
    }
}
