//! Session state machine states
//!
//! ```text
//!            start (connected)            stop / disconnect
//!   Idle ───────────────────────▶ OnlinePlaying ───────────────▶ Idle
//!     │
//!     │      start (!connected)          stop / timer / disconnect
//!     └─────────────────────────▶ OfflinePlaying ──────────────▶ Idle
//! ```

use std::fmt;

/// Where captured audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// Streamed over the network connection
    Online,
    /// Recorded to local storage with motion data
    Offline,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Exactly one of these holds at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    OnlinePlaying,
    OfflinePlaying,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_playing(&self) -> bool {
        !self.is_idle()
    }

    pub fn mode(&self) -> Option<SessionMode> {
        match self {
            Self::Idle => None,
            Self::OnlinePlaying => Some(SessionMode::Online),
            Self::OfflinePlaying => Some(SessionMode::Offline),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OnlinePlaying => "playing online",
            Self::OfflinePlaying => "playing offline",
        }
    }

    /// State a start action enters from Idle
    pub fn playing(mode: SessionMode) -> Self {
        match mode {
            SessionMode::Online => Self::OnlinePlaying,
            SessionMode::Offline => Self::OfflinePlaying,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only view of the controller for presentation layers
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub connected: bool,
    pub timer_armed: bool,
    /// Name of the running offline session, or the one queued for the next start
    pub session_name: Option<String>,
    /// Device motion, raw gyro, raw accelerometer
    pub motion_columns: [usize; 3],
    pub frames_converted: u64,
    pub frames_dropped: u64,
}
