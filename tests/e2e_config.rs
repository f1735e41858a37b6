//! E2E tests for configuration loading

use echoprober::audio::signal::SignalKind;
use echoprober::config::ProbeConfig;
use echoprober::net::framer::DelimiterPolicy;
use std::time::Duration;

/// Test a full config file overriding every section
#[test]
fn test_full_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("probe.json");
    std::fs::write(
        &path,
        r#"{
            "host": "probe.local",
            "port": 9100,
            "delimiter": "always",
            "wire": { "sample_rate": 16000, "channels": 2, "interleaved": true },
            "waveform": {
                "kernel_len": 200,
                "duration": 2205,
                "repeat_num": 10,
                "left": { "signal": { "kind": "tone", "frequency": 1000.0 }, "volume": 0.5 },
                "right": { "signal": { "kind": "chirp", "start_hz": 2000.0, "end_hz": 4000.0 }, "volume": 0.25 }
            },
            "auto_stop": [{ "prefix": "quick", "seconds": 10 }],
            "storage_dir": "/tmp/probe-sessions"
        }"#,
    )
    .unwrap();

    let config = ProbeConfig::load_from(&path).unwrap();
    assert_eq!(config.host, "probe.local");
    assert_eq!(config.port, 9100);
    assert_eq!(config.delimiter, DelimiterPolicy::Always);
    assert_eq!(config.wire.channels, 2);
    assert!(config.wire.interleaved);
    assert_eq!(config.waveform.repeat_num, 10);
    assert_eq!(config.waveform.left.signal, SignalKind::Tone { frequency: 1000.0 });
    assert_eq!(config.waveform.right.volume, 0.25);
    assert_eq!(config.auto_stop_for("quick_1"), Some(Duration::from_secs(10)));
    assert_eq!(config.storage_dir, std::path::PathBuf::from("/tmp/probe-sessions"));
}

/// Test that a partial waveform section keeps the remaining defaults
#[test]
fn test_partial_waveform() {
    let config: ProbeConfig = serde_json::from_str(r#"{"waveform": {"repeat_num": 5}}"#).unwrap();
    assert_eq!(config.waveform.repeat_num, 5);
    assert_eq!(config.waveform.kernel_len, 500);
    assert_eq!(config.waveform.duration, 4410);
}

/// Test that a broken file falls back to defaults
#[test]
fn test_load_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("probe.json");
    std::fs::write(&path, r#"{"port": "not a number"}"#).unwrap();
    assert!(ProbeConfig::load_from(&path).is_err());
    assert_eq!(ProbeConfig::load(&path), ProbeConfig::default());
}
