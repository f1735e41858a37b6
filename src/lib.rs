//! EchoProber - acoustic ranging probe client
//!
//! This library re-exports the probe synthesis, capture conversion, network
//! framing and session control functionality from `echoprober-core`.

pub use echoprober_core::{audio, config, error, event, motion, net, session};

pub use echoprober_core::{
    AudioFrame, CaptureBuffer, ConversionPipeline, FormatConverter, MotionRecorder, NetworkClient,
    ProbeConfig, ProbeError, ProbeEvent, ProbeWaveform, Result, SessionController, SessionState,
    WavBuffer,
};
pub use echoprober_core::{
    BUILD_DATE, CAPTURE_BUFFER_FRAMES, FRAME_DELIMITER, PROBE_SAMPLE_RATE, VERSION,
    WIRE_SAMPLE_RATE,
};
