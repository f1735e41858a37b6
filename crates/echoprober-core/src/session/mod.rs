//! Session control
//!
//! - Session state and snapshots ([`state`])
//! - Contracts for capture, playback and capture-to-file collaborators ([`io`])
//! - Single-shot cancellable auto-stop timer ([`timer`])
//! - Session file naming and locations ([`storage`])
//! - PCM capture-to-file recorder ([`recording`])
//! - The start/stop state machine ([`controller`])

pub mod controller;
pub mod io;
pub mod recording;
pub mod state;
pub mod storage;
pub mod timer;
