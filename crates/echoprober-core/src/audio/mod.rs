//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Probe signal synthesis: tone, chirp, Hann window ([`signal`])
//! - Stereo PCM16 / WAV encoding of the probe ([`wav`])
//! - Capture buffer conversion to the fixed wire format ([`convert`])
//! - cpal-backed capture and playback ([`device`], `device` feature)

pub mod convert;
#[cfg(feature = "device")]
pub mod device;
pub mod signal;
pub mod wav;
