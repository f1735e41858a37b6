//! EchoProber Core - probe synthesis, capture conversion, and session control
//!
//! This library implements the real-time half of an acoustic ranging probe:
//! it synthesizes a repeating chirp/tone stereo waveform for playback, converts
//! microphone capture into fixed-format PCM frames, streams those frames over a
//! delimiter-framed TCP connection (online mode) or records them locally
//! together with inertial sensor samples (offline mode).

pub mod audio;
pub mod config;
pub mod error;
pub mod event;
pub mod motion;
pub mod net;
pub mod session;

pub use audio::convert::{AudioFrame, CaptureBuffer, ConversionPipeline, FormatConverter};
pub use audio::signal::ProbeWaveform;
pub use audio::wav::WavBuffer;
pub use config::ProbeConfig;
pub use error::{ProbeError, Result};
pub use event::ProbeEvent;
pub use motion::MotionRecorder;
pub use net::framer::NetworkClient;
pub use session::controller::SessionController;
pub use session::state::SessionState;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (YYYY-MM-DD), stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Sample rate of the synthesized probe waveform and its WAV container
pub const PROBE_SAMPLE_RATE: u32 = 44100;

/// Sample rate of streamed capture frames
pub const WIRE_SAMPLE_RATE: u32 = 48000;

/// Requested capture buffer size in frames (100ms at 48kHz)
pub const CAPTURE_BUFFER_FRAMES: u32 = 4800;

/// Delimiter written after every outbound network unit
pub const FRAME_DELIMITER: [u8; 2] = *b"\r\n";
