//! Error taxonomy shared by every subsystem
//!
//! Per-frame and per-sample failures are recovered where they happen and only
//! surface as [`crate::event::ProbeEvent`]s; the variants here are what
//! fallible operations hand back to their caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the core crate
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors raised by probe subsystems
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{subsystem} permission denied")]
    PermissionDenied { subsystem: &'static str },

    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected")]
    NotConnected,

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("File error at {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl ProbeError {
    /// Wrap an I/O error with the path it happened on
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

/// A captured buffer could not be converted to the wire format
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Capture buffer has zero channels")]
    NoChannels,

    #[error("Capture buffer has zero sample rate")]
    NoSampleRate,

    #[error("Buffer of {samples} samples is not a whole number of {channels}-channel frames")]
    RaggedBuffer { samples: usize, channels: u16 },

    #[error("Unsupported output channel count: {0}")]
    UnsupportedChannels(u16),
}

/// Waveform parameters that would produce a corrupt buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Kernel length {kernel_len} exceeds slot duration {duration}")]
    KernelTooLong { kernel_len: usize, duration: usize },

    #[error("{duration} x {repeat_num} samples overflows the sample count")]
    LengthOverflow { duration: usize, repeat_num: usize },

    #[error("Channel lengths differ: left {left}, right {right}")]
    ChannelMismatch { left: usize, right: usize },

    #[error("Expected {expected} samples per channel, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Payload of {0} bytes does not fit a WAV size field")]
    PayloadTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_error_converts() {
        let err: ProbeError = EncodingError::KernelTooLong {
            kernel_len: 10,
            duration: 5,
        }
        .into();
        assert!(matches!(err, ProbeError::Encoding(_)));
        assert_eq!(err.to_string(), "Kernel length 10 exceeds slot duration 5");
    }

    #[test]
    fn test_file_error_mentions_path() {
        let err = ProbeError::file(
            "/tmp/x.csv",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(err.to_string().contains("/tmp/x.csv"));
        assert!(err.to_string().contains("disk full"));
    }
}
