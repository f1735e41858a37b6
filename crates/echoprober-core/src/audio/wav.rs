//! Stereo PCM16 and WAV encoding
//!
//! The probe is stored as a 44-byte RIFF header (PCM, stereo, 44.1kHz,
//! 16-bit) followed by interleaved frames. Each frame is written **right
//! channel first**: `[R lo, R hi, L lo, L hi]`. Receivers depend on this
//! order, so it must not change.
//!
//! Header layout:
//! ```text
//! [0-3]    "RIFF"
//! [4-7]    file size - 8 (36 + data_size)
//! [8-11]   "WAVE"
//! [12-15]  "fmt "
//! [16-19]  16 (PCM format chunk size)
//! [20-21]  1 (PCM format code)
//! [22-23]  channels
//! [24-27]  sample_rate
//! [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
//! [32-33]  block_align = channels * bit_depth / 8
//! [34-35]  bit_depth
//! [36-39]  "data"
//! [40-43]  data_size
//! ```

use crate::audio::convert::AudioFrame;
use crate::error::{EncodingError, ProbeError};
use std::path::Path;

/// Size of the standard WAV RIFF header in bytes
pub const WAV_HEADER_SIZE: usize = 44;

/// Channels in the probe container
pub const PROBE_CHANNELS: u16 = 2;

/// Bits per sample in the probe container
pub const PROBE_BIT_DEPTH: u16 = 16;

/// Full-scale multiplier for float to PCM16
const PCM16_SCALE: f64 = 32767.0;

/// Generate a 44-byte WAV RIFF header for `data_size` payload bytes
pub fn generate_wav_header(
    sample_rate: u32,
    bit_depth: u16,
    channels: u16,
    data_size: u32,
) -> [u8; WAV_HEADER_SIZE] {
    let byte_rate = sample_rate * channels as u32 * bit_depth as u32 / 8;
    let block_align = channels * bit_depth / 8;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Scale a float sample by `volume × 32767` and truncate to 16 bits
///
/// Truncation is toward zero, not `floor`: `-0.25` at full volume encodes as
/// `-8191`, not `-8192`.
///
/// Out-of-range products wrap (two's complement) rather than saturate, which
/// keeps the encoded probe bit-identical to previously recorded captures.
/// Callers are expected to keep `sample × volume` within `[-1, 1]`.
#[inline]
pub fn quantize_pcm16(sample: f64, volume: f64) -> i16 {
    (sample * volume * PCM16_SCALE) as i32 as i16
}

/// Verify both channels hold exactly `duration × n_repeats` samples
///
/// Returns the per-channel sample count.
pub fn check_channels(
    left: &[f64],
    right: &[f64],
    duration: usize,
    n_repeats: usize,
) -> Result<usize, EncodingError> {
    if left.len() != right.len() {
        return Err(EncodingError::ChannelMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    let expected = duration
        .checked_mul(n_repeats)
        .ok_or(EncodingError::LengthOverflow {
            duration,
            repeat_num: n_repeats,
        })?;
    if left.len() != expected {
        return Err(EncodingError::LengthMismatch {
            expected,
            actual: left.len(),
        });
    }
    Ok(expected)
}

/// Encode two channels as a stereo 16-bit WAV buffer
///
/// Both size fields of the header are computed from
/// `duration × n_repeats × 2 channels × 2 bytes`; the call fails instead of
/// emitting a header that disagrees with its payload.
///
/// # Example
/// ```
/// use echoprober_core::audio::signal::generate_tone;
/// use echoprober_core::audio::wav::encode_stereo_pcm16;
///
/// let tone = generate_tone(100, 1600, 100, 14000.0).unwrap();
/// let wav = encode_stereo_pcm16(&tone, &tone, 1.0, 1.0, 1600, 100).unwrap();
/// assert_eq!(wav.len(), 44 + 1600 * 100 * 2 * 2);
/// ```
pub fn encode_stereo_pcm16(
    left: &[f64],
    right: &[f64],
    vol_left: f64,
    vol_right: f64,
    duration: usize,
    n_repeats: usize,
) -> Result<WavBuffer, EncodingError> {
    let frames = check_channels(left, right, duration, n_repeats)?;
    let block_align = (PROBE_CHANNELS * PROBE_BIT_DEPTH / 8) as usize;
    let n_bytes = frames
        .checked_mul(block_align)
        .ok_or(EncodingError::LengthOverflow {
            duration,
            repeat_num: n_repeats,
        })?;
    let data_size = u32::try_from(n_bytes)
        .ok()
        .filter(|size| size.checked_add(36).is_some())
        .ok_or(EncodingError::PayloadTooLarge(n_bytes))?;

    let mut bytes = Vec::with_capacity(WAV_HEADER_SIZE + n_bytes);
    bytes.extend_from_slice(&generate_wav_header(
        crate::PROBE_SAMPLE_RATE,
        PROBE_BIT_DEPTH,
        PROBE_CHANNELS,
        data_size,
    ));
    for (&l, &r) in left.iter().zip(right) {
        bytes.extend_from_slice(&quantize_pcm16(r, vol_right).to_le_bytes());
        bytes.extend_from_slice(&quantize_pcm16(l, vol_left).to_le_bytes());
    }

    Ok(WavBuffer { bytes })
}

/// Raw little-endian PCM16 bytes of one converted capture frame, no header
///
/// Samples come out interleaved whatever the frame's internal layout.
pub fn pcm_buffer_to_bytes(frame: &AudioFrame) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.samples().len() * 2);
    for sample in frame.interleaved_samples() {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// A complete RIFF/WAV file held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavBuffer {
    bytes: Vec<u8>,
}

impl WavBuffer {
    /// Total length including the header
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Interleaved sample bytes after the header
    pub fn data(&self) -> &[u8] {
        &self.bytes[WAV_HEADER_SIZE..]
    }

    /// Header field at offset 4
    pub fn riff_size_field(&self) -> u32 {
        read_u32_le(&self.bytes, 4)
    }

    /// Header field at offset 40
    pub fn data_size_field(&self) -> u32 {
        read_u32_le(&self.bytes, 40)
    }

    /// Decode the payload into frames in file order (right, left)
    pub fn frames(&self) -> impl Iterator<Item = [i16; 2]> + '_ {
        self.data()
            .chunks_exact(4)
            .map(|c| [i16::from_le_bytes([c[0], c[1]]), i16::from_le_bytes([c[2], c[3]])])
    }

    /// Write the buffer to a `.wav` file
    pub fn write_to(&self, path: &Path) -> Result<(), ProbeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProbeError::file(parent, e))?;
        }
        std::fs::write(path, &self.bytes).map_err(|e| ProbeError::file(path, e))?;
        tracing::info!(path = %path.display(), bytes = self.bytes.len(), "Probe WAV written");
        Ok(())
    }
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
