//! Probe client configuration
//!
//! Read from a JSON file; every field is optional and falls back to the
//! defaults below. The client never writes the file back.

use crate::audio::convert::WireFormat;
use crate::audio::signal::WaveformSpec;
use crate::error::ProbeError;
use crate::net::framer::{DelimiterPolicy, FramerOptions};
use crate::session::timer::{auto_stop_after, AutoStopRule};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default probe host
pub const DEFAULT_HOST: &str = "10.25.213.103";

/// Default probe port
pub const DEFAULT_PORT: u16 = 8173;

/// Probe client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Upper bound on a single socket read
    pub read_chunk: usize,
    pub delimiter: DelimiterPolicy,
    /// Outbound units queued before PCM frames are dropped
    pub send_queue: usize,
    /// Bound on one socket write
    pub write_timeout_ms: u64,
    /// Format captured audio is converted to before it leaves the device
    pub wire: WireFormat,
    /// Requested capture buffer size in frames
    pub capture_buffer_frames: u32,
    pub waveform: WaveformSpec,
    /// Offline sessions whose name starts with a prefix stop after its seconds
    pub auto_stop: Vec<AutoStopRule>,
    /// Where offline sessions are stored
    pub storage_dir: PathBuf,
    /// Sensor update interval requested from motion sources
    pub sensor_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 1000,
            read_chunk: 10 * 1024,
            delimiter: DelimiterPolicy::default(),
            send_queue: 32,
            write_timeout_ms: 2000,
            wire: WireFormat::default(),
            capture_buffer_frames: crate::CAPTURE_BUFFER_FRAMES,
            waveform: WaveformSpec::default(),
            auto_stop: vec![AutoStopRule::new("long", 120), AutoStopRule::new("short", 60)],
            storage_dir: default_storage_dir(),
            sensor_interval_ms: crate::motion::DEFAULT_SENSOR_INTERVAL_MS,
        }
    }
}

/// `<data_dir>/echoprober/sessions`
pub fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("echoprober")
        .join("sessions")
}

impl ProbeConfig {
    /// Load and validate a config file
    pub fn load_from(path: &Path) -> Result<Self, ProbeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ProbeError::file(path, e))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ProbeError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config from disk");
        Ok(config)
    }

    /// Load a config file, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(ProbeError::File { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Reject values the subsystems cannot work with
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.host.trim().is_empty() {
            return Err(ProbeError::Config("host is empty".into()));
        }
        if self.port == 0 {
            return Err(ProbeError::Config("port must be non-zero".into()));
        }
        if self.read_chunk == 0 {
            return Err(ProbeError::Config("read_chunk must be non-zero".into()));
        }
        if self.send_queue == 0 {
            return Err(ProbeError::Config("send_queue must be non-zero".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ProbeError::Config("write_timeout_ms must be non-zero".into()));
        }
        if self.capture_buffer_frames == 0 {
            return Err(ProbeError::Config("capture_buffer_frames must be non-zero".into()));
        }
        if self.auto_stop.iter().any(|r| r.prefix.is_empty()) {
            return Err(ProbeError::Config("auto_stop prefix is empty".into()));
        }
        Ok(())
    }

    pub fn framer_options(&self) -> FramerOptions {
        FramerOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_chunk: self.read_chunk,
            delimiter: self.delimiter,
            send_queue: self.send_queue,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    /// Auto-stop deadline for an offline session name
    pub fn auto_stop_for(&self, name: &str) -> Option<Duration> {
        auto_stop_after(name, &self.auto_stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.host, "10.25.213.103");
        assert_eq!(config.port, 8173);
        assert_eq!(config.read_chunk, 10240);
        assert_eq!(config.wire.sample_rate, 48000);
        assert_eq!(config.wire.channels, 1);
        assert_eq!(config.capture_buffer_frames, 4800);
        assert_eq!(config.delimiter, DelimiterPolicy::OnPayloadSuccess);
        assert!(config.storage_dir.ends_with("echoprober/sessions"));
        config.validate().unwrap();
    }

    #[test]
    fn test_auto_stop_defaults() {
        let config = ProbeConfig::default();
        assert_eq!(config.auto_stop_for("long_corridor"), Some(Duration::from_secs(120)));
        assert_eq!(config.auto_stop_for("short"), Some(Duration::from_secs(60)));
        assert_eq!(config.auto_stop_for("kitchen"), None);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"host": "192.168.1.20", "delimiter": "always"}"#;
        let config: ProbeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.host, "192.168.1.20");
        assert_eq!(config.port, 8173);
        assert_eq!(config.delimiter, DelimiterPolicy::Always);
        assert_eq!(config.waveform, WaveformSpec::default());
    }

    #[test]
    fn test_framer_options() {
        let config: ProbeConfig =
            serde_json::from_str(r#"{"connect_timeout_ms": 250, "read_chunk": 512}"#).unwrap();
        let opts = config.framer_options();
        assert_eq!(opts.connect_timeout, Duration::from_millis(250));
        assert_eq!(opts.read_chunk, 512);
        assert_eq!(opts.send_queue, 32);
        assert_eq!(opts.write_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_zero_send_queue_rejected() {
        let config = ProbeConfig {
            send_queue: 0,
            ..ProbeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.json");
        std::fs::write(&path, r#"{"port": 9000, "auto_stop": [{"prefix": "lap", "seconds": 5}]}"#).unwrap();

        let config = ProbeConfig::load_from(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.auto_stop_for("lap3"), Some(Duration::from_secs(5)));
        assert_eq!(config.auto_stop_for("long"), None);
    }

    #[test]
    fn test_load_from_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.json");
        std::fs::write(&path, r#"{"port": 0}"#).unwrap();
        assert!(matches!(ProbeConfig::load_from(&path), Err(ProbeError::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(ProbeConfig::load_from(&path), Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert_eq!(ProbeConfig::load(&missing), ProbeConfig::default());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert_eq!(ProbeConfig::load(&broken), ProbeConfig::default());
    }
}
