//! Probe signal synthesis
//!
//! Generates the unit kernels (a pure tone or a Hann-windowed linear chirp),
//! embeds each kernel at the start of a zero-padded slot of `duration`
//! samples and tiles that slot `repeat_num` times. All synthesis runs at
//! [`crate::PROBE_SAMPLE_RATE`].

use crate::audio::wav::{self, WavBuffer};
use crate::error::EncodingError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Symmetric Hann window of `len` samples
///
/// The first `ceil(len / 2)` values are computed as
/// `0.5 - 0.5 * cos(2πi / (len - 1))` and mirrored onto the second half, so
/// `w[i] == w[len - 1 - i]` holds exactly.
///
/// # Example
/// ```
/// use echoprober_core::audio::signal::hann_window;
///
/// let w = hann_window(5);
/// assert_eq!(w[0], 0.0);
/// assert_eq!(w[2], 1.0);
/// assert_eq!(w[1], w[3]);
/// ```
pub fn hann_window(len: usize) -> Vec<f64> {
    match len {
        0 => return Vec::new(),
        1 => return vec![1.0],
        _ => {}
    }

    let denom = (len - 1) as f64;
    let half = len.div_ceil(2);
    let mut window = vec![0.0; len];
    for i in 0..half {
        let w = 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos();
        window[i] = w;
        window[len - 1 - i] = w;
    }
    window
}

/// Tiled pure tone
///
/// `kernel[i] = cos(2π·f·i / fs)` for `i` in `0..kernel_len`, zero-padded to
/// `duration` and repeated `repeat_num` times.
///
/// # Example
/// ```
/// use echoprober_core::audio::signal::generate_tone;
///
/// let tone = generate_tone(100, 1600, 100, 14000.0).unwrap();
/// assert_eq!(tone.len(), 160_000);
/// ```
pub fn generate_tone(
    kernel_len: usize,
    duration: usize,
    repeat_num: usize,
    frequency: f64,
) -> Result<Vec<f64>, EncodingError> {
    check_layout(kernel_len, duration, repeat_num)?;

    let fs = crate::PROBE_SAMPLE_RATE as f64;
    let kernel: Vec<f64> = (0..kernel_len)
        .map(|i| (2.0 * PI * frequency * i as f64 / fs).cos())
        .collect();

    tile(&kernel, duration, repeat_num)
}

/// Tiled, Hann-windowed linear chirp from `start_hz` to `end_hz`
///
/// With `t1 = kernel_len / fs` and `β = (f1 - f0) / t1`, sample `i` sits at
/// `t = (i + 1) / fs` and has phase `2π(β/2·t² + f0·t)`.
pub fn generate_chirp(
    kernel_len: usize,
    duration: usize,
    repeat_num: usize,
    start_hz: f64,
    end_hz: f64,
) -> Result<Vec<f64>, EncodingError> {
    check_layout(kernel_len, duration, repeat_num)?;

    let fs = crate::PROBE_SAMPLE_RATE as f64;
    let t1 = kernel_len as f64 / fs;
    let beta = (end_hz - start_hz) / t1;
    let window = hann_window(kernel_len);

    let kernel: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let t = (i + 1) as f64 / fs;
            let phase = 2.0 * PI * (beta / 2.0 * t * t + start_hz * t);
            phase.cos() * w
        })
        .collect();

    tile(&kernel, duration, repeat_num)
}

fn check_layout(kernel_len: usize, duration: usize, repeat_num: usize) -> Result<usize, EncodingError> {
    if kernel_len > duration {
        return Err(EncodingError::KernelTooLong {
            kernel_len,
            duration,
        });
    }
    total_len(duration, repeat_num)
}

fn total_len(duration: usize, repeat_num: usize) -> Result<usize, EncodingError> {
    duration
        .checked_mul(repeat_num)
        .ok_or(EncodingError::LengthOverflow {
            duration,
            repeat_num,
        })
}

fn tile(kernel: &[f64], duration: usize, repeat_num: usize) -> Result<Vec<f64>, EncodingError> {
    let total = total_len(duration, repeat_num)?;
    let mut slot = vec![0.0; duration];
    slot[..kernel.len()].copy_from_slice(kernel);

    let mut out = Vec::with_capacity(total);
    for _ in 0..repeat_num {
        out.extend_from_slice(&slot);
    }
    Ok(out)
}

/// Kernel shape for one probe channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    /// Unwindowed cosine at a fixed frequency
    Tone { frequency: f64 },
    /// Hann-windowed linear sweep
    Chirp { start_hz: f64, end_hz: f64 },
}

impl SignalKind {
    fn generate(&self, kernel_len: usize, duration: usize, repeat_num: usize) -> Result<Vec<f64>, EncodingError> {
        match *self {
            Self::Tone { frequency } => generate_tone(kernel_len, duration, repeat_num, frequency),
            Self::Chirp { start_hz, end_hz } => {
                generate_chirp(kernel_len, duration, repeat_num, start_hz, end_hz)
            }
        }
    }
}

/// Signal and output gain for one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub signal: SignalKind,
    /// Linear gain applied at encoding time (keep within 0.0..=1.0)
    pub volume: f64,
}

/// Parameters for the stereo probe waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformSpec {
    /// Samples in the unrepeated kernel
    pub kernel_len: usize,
    /// Slot length the kernel is zero-padded to
    pub duration: usize,
    /// Number of slots in the waveform
    pub repeat_num: usize,
    pub left: ChannelSpec,
    pub right: ChannelSpec,
}

impl Default for WaveformSpec {
    /// 500-sample 15-20kHz chirp on the left, 14kHz tone on the right,
    /// both in 4410-sample (100ms) slots repeated 100 times
    fn default() -> Self {
        Self {
            kernel_len: 500,
            duration: 4410,
            repeat_num: 100,
            left: ChannelSpec {
                signal: SignalKind::Chirp {
                    start_hz: 15000.0,
                    end_hz: 20000.0,
                },
                volume: 1.0,
            },
            right: ChannelSpec {
                signal: SignalKind::Tone { frequency: 14000.0 },
                volume: 1.0,
            },
        }
    }
}

/// Synthesized stereo probe: two equal-length channels of
/// `duration × repeat_num` samples
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeWaveform {
    left: Vec<f64>,
    right: Vec<f64>,
    duration: usize,
    repeat_num: usize,
}

impl ProbeWaveform {
    /// Wrap two channels, checking both hold `duration × repeat_num` samples
    pub fn new(
        left: Vec<f64>,
        right: Vec<f64>,
        duration: usize,
        repeat_num: usize,
    ) -> Result<Self, EncodingError> {
        wav::check_channels(&left, &right, duration, repeat_num)?;
        Ok(Self {
            left,
            right,
            duration,
            repeat_num,
        })
    }

    /// Synthesize both channels from a spec
    pub fn synthesize(spec: &WaveformSpec) -> Result<Self, EncodingError> {
        let left = spec
            .left
            .signal
            .generate(spec.kernel_len, spec.duration, spec.repeat_num)?;
        let right = spec
            .right
            .signal
            .generate(spec.kernel_len, spec.duration, spec.repeat_num)?;
        Self::new(left, right, spec.duration, spec.repeat_num)
    }

    /// Encode as a stereo 16-bit WAV buffer
    pub fn to_wav(&self, vol_left: f64, vol_right: f64) -> Result<WavBuffer, EncodingError> {
        wav::encode_stereo_pcm16(
            &self.left,
            &self.right,
            vol_left,
            vol_right,
            self.duration,
            self.repeat_num,
        )
    }

    pub fn left(&self) -> &[f64] {
        &self.left
    }

    pub fn right(&self) -> &[f64] {
        &self.right
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn duration(&self) -> usize {
        self.duration
    }

    pub fn repeat_num(&self) -> usize {
        self.repeat_num
    }

    /// Playback length in seconds
    pub fn seconds(&self) -> f64 {
        self.len() as f64 / crate::PROBE_SAMPLE_RATE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hann_window_small_lengths() {
        assert!(hann_window(0).is_empty());
        assert_eq!(hann_window(1), vec![1.0]);
        assert_eq!(hann_window(2), vec![0.0, 0.0]);
    }

    #[test]
    fn test_hann_window_symmetry() {
        for len in 2..200 {
            let w = hann_window(len);
            for i in 0..len {
                assert_eq!(w[i], w[len - 1 - i], "len {} index {}", len, i);
            }
        }
    }

    #[test]
    fn test_hann_window_peak_and_edges() {
        let w = hann_window(101);
        assert_eq!(w[0], 0.0);
        assert_relative_eq!(w[50], 1.0, epsilon = 1e-12);
        assert!(w.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }

    #[test]
    fn test_tone_kernel_values() {
        let tone = generate_tone(4, 8, 2, 11025.0).unwrap();
        // quarter-rate cosine: 1, 0, -1, 0, then padding
        let expected = [1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        for (i, &e) in expected.iter().enumerate() {
            assert_relative_eq!(tone[i], e, epsilon = 1e-12);
            assert_relative_eq!(tone[i + 8], e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_tone_periodic() {
        let tone = generate_tone(100, 1600, 5, 14000.0).unwrap();
        for i in 0..tone.len() {
            assert_eq!(tone[i], tone[i % 1600]);
        }
    }

    #[test]
    fn test_chirp_windowed_and_bounded() {
        let chirp = generate_chirp(500, 4410, 3, 15000.0, 20000.0).unwrap();
        assert_eq!(chirp.len(), 4410 * 3);
        // Hann window zeroes both kernel ends
        assert_eq!(chirp[0], 0.0);
        assert_eq!(chirp[499], 0.0);
        assert!(chirp.iter().all(|x| x.abs() <= 1.0));
        assert!(chirp[500..4410].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_chirp_periodic() {
        let chirp = generate_chirp(64, 256, 10, 1000.0, 5000.0).unwrap();
        for i in 0..chirp.len() {
            assert_eq!(chirp[i], chirp[i % 256]);
        }
    }

    #[test]
    fn test_kernel_longer_than_slot_rejected() {
        let err = generate_tone(20, 10, 1, 1000.0).unwrap_err();
        assert_eq!(
            err,
            EncodingError::KernelTooLong {
                kernel_len: 20,
                duration: 10
            }
        );
        assert!(generate_chirp(20, 10, 1, 1.0, 2.0).is_err());
    }

    #[test]
    fn test_length_overflow_rejected() {
        let err = generate_tone(1, usize::MAX, 2, 1000.0).unwrap_err();
        assert!(matches!(err, EncodingError::LengthOverflow { .. }));
    }

    #[test]
    fn test_default_spec_synthesizes() {
        let probe = ProbeWaveform::synthesize(&WaveformSpec::default()).unwrap();
        assert_eq!(probe.len(), 441_000);
        assert_eq!(probe.right().len(), 441_000);
        assert_relative_eq!(probe.seconds(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_probe_rejects_mismatched_channels() {
        let err = ProbeWaveform::new(vec![0.0; 4], vec![0.0; 3], 2, 2).unwrap_err();
        assert!(matches!(err, EncodingError::ChannelMismatch { .. }));
    }

    #[test]
    fn test_signal_kind_serde() {
        let json = r#"{"kind":"chirp","start_hz":15000.0,"end_hz":20000.0}"#;
        let kind: SignalKind = serde_json::from_str(json).unwrap();
        assert_eq!(
            kind,
            SignalKind::Chirp {
                start_hz: 15000.0,
                end_hz: 20000.0
            }
        );
    }
}
