//! Capture conversion pipeline
//!
//! Captured buffers arrive in whatever format the input device delivers
//! (float or 16-bit, any rate, any channel count). [`FormatConverter`] turns
//! each one into an [`AudioFrame`] in the fixed wire format, and
//! [`ConversionPipeline`] runs that conversion on a single background thread
//! so the capture callback never blocks and frames leave in arrival order.

use crate::error::{ConversionError, ProbeError};
use crate::event::{EventSender, ProbeEvent};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Capture buffers that may wait for conversion before new ones are dropped
const QUEUE_DEPTH: usize = 64;

/// Samples as delivered by the capture source, interleaved
#[derive(Debug, Clone, PartialEq)]
pub enum NativeSamples {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl NativeSamples {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(s) => s.len(),
            Self::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_f32(&self) -> Vec<f32> {
        match self {
            Self::F32(s) => s.clone(),
            Self::I16(s) => s.iter().map(|&x| x as f32 / 32768.0).collect(),
        }
    }
}

/// One buffer from the capture callback
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBuffer {
    pub samples: NativeSamples,
    pub channels: u16,
    pub sample_rate: u32,
}

impl CaptureBuffer {
    pub fn from_f32(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: NativeSamples::F32(samples),
            channels,
            sample_rate,
        }
    }

    pub fn from_i16(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: NativeSamples::I16(samples),
            channels,
            sample_rate,
        }
    }

    /// Frames in the buffer (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Target format of converted frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireFormat {
    pub sample_rate: u32,
    /// 1 or 2
    pub channels: u16,
    /// Sample layout inside [`AudioFrame`]; bytes on the wire are always interleaved
    pub interleaved: bool,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self {
            sample_rate: crate::WIRE_SAMPLE_RATE,
            channels: 1,
            interleaved: false,
        }
    }
}

/// Block of 16-bit samples in the wire format
///
/// Planar frames store all of channel 0, then all of channel 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    interleaved: bool,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32, interleaved: bool) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            interleaved,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.frame_count() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Samples in interleaved order regardless of the stored layout
    pub fn interleaved_samples(&self) -> impl Iterator<Item = i16> + '_ {
        let channels = self.channels.max(1) as usize;
        let frames = self.frame_count();
        let planar = !self.interleaved && channels > 1;
        (0..frames * channels).map(move |i| {
            if planar {
                self.samples[(i % channels) * frames + i / channels]
            } else {
                self.samples[i]
            }
        })
    }

    /// Raw PCM16 little-endian payload for the network
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::audio::wav::pcm_buffer_to_bytes(self)
    }
}

/// Converts capture buffers to [`WireFormat`] frames
///
/// Sample rate conversion is continuous across calls: the converter keeps
/// the fractional source position and the last input sample of each
/// channel, so a stream of buffers yields the same number of output frames
/// as one long buffer would. Use a fresh converter (or [`reset`]) per stream.
///
/// [`reset`]: FormatConverter::reset
#[derive(Debug, Clone)]
pub struct FormatConverter {
    target: WireFormat,
    resampler: StreamResampler,
}

impl FormatConverter {
    pub fn new(target: WireFormat) -> Result<Self, ConversionError> {
        if !(1..=2).contains(&target.channels) {
            return Err(ConversionError::UnsupportedChannels(target.channels));
        }
        if target.sample_rate == 0 {
            return Err(ConversionError::NoSampleRate);
        }
        Ok(Self {
            target,
            resampler: StreamResampler::default(),
        })
    }

    pub fn target(&self) -> WireFormat {
        self.target
    }

    /// Forget resampler state carried over from earlier buffers
    pub fn reset(&mut self) {
        self.resampler = StreamResampler::default();
    }

    /// Convert the next capture buffer of the stream
    pub fn convert(&mut self, buffer: &CaptureBuffer) -> Result<AudioFrame, ConversionError> {
        if buffer.channels == 0 {
            return Err(ConversionError::NoChannels);
        }
        if buffer.sample_rate == 0 {
            return Err(ConversionError::NoSampleRate);
        }
        let src_channels = buffer.channels as usize;
        if buffer.samples.len() % src_channels != 0 {
            return Err(ConversionError::RaggedBuffer {
                samples: buffer.samples.len(),
                channels: buffer.channels,
            });
        }

        let samples = buffer.samples.to_f32();
        let planes = map_channels(&samples, src_channels, self.target.channels as usize);
        let planes = self
            .resampler
            .process(planes, buffer.sample_rate, self.target.sample_rate);

        let frames = planes.first().map(Vec::len).unwrap_or(0);
        let mut out = Vec::with_capacity(frames * planes.len());
        if self.target.interleaved {
            for i in 0..frames {
                out.extend(planes.iter().map(|p| to_pcm16(p[i])));
            }
        } else {
            for plane in &planes {
                out.extend(plane.iter().map(|&x| to_pcm16(x)));
            }
        }

        Ok(AudioFrame::new(
            out,
            self.target.channels,
            self.target.sample_rate,
            self.target.interleaved,
        ))
    }
}

impl Default for FormatConverter {
    fn default() -> Self {
        Self {
            target: WireFormat::default(),
            resampler: StreamResampler::default(),
        }
    }
}

/// Split interleaved samples into `dst` planes (mono: average, stereo: first two)
fn map_channels(samples: &[f32], src: usize, dst: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / src;
    match (src, dst) {
        (_, 1) => {
            let scale = 1.0 / src as f32;
            vec![samples
                .chunks_exact(src)
                .map(|f| f.iter().sum::<f32>() * scale)
                .collect()]
        }
        (1, _) => vec![samples.to_vec(); dst],
        _ => (0..dst)
            .map(|c| (0..frames).map(|f| samples[f * src + c]).collect())
            .collect(),
    }
}

/// Linear-interpolation rate conversion over a stream of buffers
#[derive(Debug, Clone, Default)]
struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    /// Source position of the next output sample, relative to the start of
    /// the next buffer; `-1.0 < position` where `-1` is the carried sample
    position: f64,
    /// Last input sample of each plane from the previous buffer
    tail: Vec<f32>,
}

impl StreamResampler {
    fn process(&mut self, planes: Vec<Vec<f32>>, from_rate: u32, to_rate: u32) -> Vec<Vec<f32>> {
        if from_rate != self.from_rate || to_rate != self.to_rate || planes.len() != self.tail.len()
        {
            *self = Self {
                from_rate,
                to_rate,
                position: 0.0,
                tail: Vec::new(),
            };
        }
        let len = planes.first().map(Vec::len).unwrap_or(0);
        if from_rate == to_rate || len == 0 {
            return planes;
        }

        let ratio = from_rate as f64 / to_rate as f64;
        let mut outputs: Vec<Vec<f32>> = planes
            .iter()
            .map(|_| Vec::with_capacity((len as f64 / ratio) as usize + 1))
            .collect();

        let end = len as isize;
        let mut pos = self.position;
        loop {
            let base = pos.floor();
            let frac = (pos - base) as f32;
            let idx = base as isize;
            let next = idx + 1;
            if next >= end && !(frac == 0.0 && idx < end) {
                break;
            }
            for (c, plane) in planes.iter().enumerate() {
                let at = |i: isize| -> f32 {
                    if i < 0 {
                        self.tail.get(c).copied().unwrap_or(plane[0])
                    } else {
                        plane[i as usize]
                    }
                };
                let sample = if frac == 0.0 {
                    at(idx)
                } else {
                    at(idx) * (1.0 - frac) + at(next) * frac
                };
                outputs[c].push(sample);
            }
            pos += ratio;
        }

        self.position = pos - len as f64;
        self.tail = planes.iter().map(|p| p[len - 1]).collect();
        outputs
    }
}

/// Saturating float to PCM16 (NaN maps to 0)
#[inline]
fn to_pcm16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Consumer of converted frames (network client, PCM file, test collector)
pub trait FrameSink: Send + 'static {
    fn deliver(&mut self, frame: AudioFrame) -> Result<(), ProbeError>;
}

impl FrameSink for Sender<AudioFrame> {
    fn deliver(&mut self, frame: AudioFrame) -> Result<(), ProbeError> {
        self.send(frame)
            .map_err(|_| ProbeError::Device("frame receiver dropped".into()))
    }
}

/// Counters shared between the capture callback and the conversion thread
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    converted: AtomicU64,
    dropped: AtomicU64,
}

impl PipelineStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn converted(&self) -> u64 {
        self.converted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cloneable handle the capture callback uses to enqueue buffers
#[derive(Clone)]
pub struct CaptureSubmitter {
    tx: Sender<CaptureBuffer>,
    stats: Arc<PipelineStats>,
    events: EventSender,
}

impl CaptureSubmitter {
    /// Enqueue a buffer without blocking; returns false if it was dropped
    pub fn submit(&self, buffer: CaptureBuffer) -> bool {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(buffer) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Conversion queue full, dropping capture buffer");
                let _ = self.events.send(ProbeEvent::FrameDropped {
                    reason: "conversion queue full".into(),
                });
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Serialized background conversion of capture buffers
///
/// One worker thread per pipeline: buffers are converted and delivered
/// strictly in submission order.
pub struct ConversionPipeline {
    submitter: Option<CaptureSubmitter>,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

impl ConversionPipeline {
    /// Spawn the conversion thread delivering into `sink`
    pub fn start<S: FrameSink>(mut converter: FormatConverter, sink: S, events: EventSender) -> Self {
        converter.reset();
        let (tx, rx) = crossbeam_channel::bounded::<CaptureBuffer>(QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let stats = Arc::new(PipelineStats::default());

        let worker_stats = Arc::clone(&stats);
        let worker_events = events.clone();
        let worker = std::thread::Builder::new()
            .name("conversion-queue".into())
            .spawn(move || {
                conversion_loop(converter, sink, rx, shutdown_rx, worker_stats, worker_events);
            })
            .expect("Failed to spawn conversion thread");

        Self {
            submitter: Some(CaptureSubmitter {
                tx,
                stats: Arc::clone(&stats),
                events,
            }),
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            stats,
        }
    }

    /// Handle for the capture callback, `None` once stopped
    pub fn submitter(&self) -> Option<CaptureSubmitter> {
        self.submitter.clone()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Convert whatever is queued, then stop the worker
    pub fn stop(&mut self) {
        self.submitter = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ConversionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn conversion_loop<S: FrameSink>(
    mut converter: FormatConverter,
    mut sink: S,
    rx: Receiver<CaptureBuffer>,
    shutdown_rx: Receiver<()>,
    stats: Arc<PipelineStats>,
    events: EventSender,
) {
    tracing::debug!(target_format = ?converter.target(), "Conversion thread running");

    let mut process = |buffer: CaptureBuffer| {
        tracing::trace!(frames = buffer.frame_count(), "Capture buffer received");
        match converter.convert(&buffer) {
            Ok(frame) => {
                tracing::debug!(
                    frames = frame.frame_count(),
                    at = %chrono::Utc::now().timestamp_millis(),
                    "Capture buffer converted"
                );
                stats.converted.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = sink.deliver(frame) {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Converted frame not delivered");
                    let _ = events.send(ProbeEvent::FrameDropped {
                        reason: e.to_string(),
                    });
                }
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Capture conversion failed, dropping buffer");
                let _ = events.send(ProbeEvent::FrameDropped {
                    reason: e.to_string(),
                });
            }
        }
    };

    loop {
        crossbeam_channel::select! {
            recv(rx) -> msg => match msg {
                Ok(buffer) => process(buffer),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                while let Ok(buffer) = rx.try_recv() {
                    process(buffer);
                }
                break;
            }
        }
    }

    tracing::debug!(
        converted = stats.converted(),
        dropped = stats.dropped(),
        "Conversion thread stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mono_converter(rate: u32) -> FormatConverter {
        FormatConverter::new(WireFormat {
            sample_rate: rate,
            channels: 1,
            interleaved: false,
        })
        .unwrap()
    }

    #[test]
    fn test_float_to_pcm16_same_rate() {
        let mut conv = mono_converter(48000);
        let buf = CaptureBuffer::from_f32(vec![0.0, 0.5, -0.5, 1.0, -1.0, 2.0], 1, 48000);
        let frame = conv.convert(&buf).unwrap();
        assert_eq!(frame.samples(), &[0, 16384, -16384, 32767, -32767, 32767]);
        assert_eq!(frame.channels(), 1);
        assert_eq!(frame.sample_rate(), 48000);
    }

    #[test]
    fn test_stereo_downmix() {
        let mut conv = mono_converter(48000);
        let buf = CaptureBuffer::from_f32(vec![0.5, 0.0, -1.0, 1.0], 2, 48000);
        let frame = conv.convert(&buf).unwrap();
        assert_eq!(frame.samples(), &[8192, 0]);
    }

    #[test]
    fn test_i16_input_passthrough_scale() {
        let mut conv = mono_converter(48000);
        let buf = CaptureBuffer::from_i16(vec![0, 16384, -32768], 1, 48000);
        let frame = conv.convert(&buf).unwrap();
        assert_eq!(frame.samples(), &[0, 16384, -32767]);
    }

    #[test]
    fn test_resample_halves_length() {
        let mut conv = mono_converter(24000);
        let buf = CaptureBuffer::from_f32(vec![0.1; 4800], 1, 48000);
        let frame = conv.convert(&buf).unwrap();
        assert_eq!(frame.frame_count(), 2400);
    }

    #[test]
    fn test_resample_keeps_rate_across_buffers() {
        let mut conv = mono_converter(48000);
        let buffers = 1000;
        let per_buffer = 512;
        let mut total = 0usize;
        for _ in 0..buffers {
            let buf = CaptureBuffer::from_f32(vec![0.25; per_buffer], 1, 44100);
            total += conv.convert(&buf).unwrap().frame_count();
        }
        let expected = (buffers * per_buffer) as f64 * 48000.0 / 44100.0;
        assert!(
            (total as f64 - expected).abs() <= 2.0,
            "converted {} frames, expected about {:.1}",
            total,
            expected
        );
    }

    #[test]
    fn test_resample_interpolates_across_buffer_edge() {
        let mut conv = mono_converter(32000);
        // 48k -> 32k steps 1.5 source samples per output
        let ramp: Vec<f32> = (0..6).map(|i| i as f32 / 10.0).collect();
        let first = conv
            .convert(&CaptureBuffer::from_f32(ramp[..3].to_vec(), 1, 48000))
            .unwrap();
        let second = conv
            .convert(&CaptureBuffer::from_f32(ramp[3..].to_vec(), 1, 48000))
            .unwrap();
        let joined: Vec<i16> = first
            .samples()
            .iter()
            .chain(second.samples())
            .copied()
            .collect();
        let expected: Vec<i16> = [0.0f32, 0.15, 0.3, 0.45].iter().map(|&x| to_pcm16(x)).collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn test_resample_restarts_after_reset() {
        let mut conv = mono_converter(24000);
        let buf = CaptureBuffer::from_f32(vec![0.1; 5], 1, 48000);
        assert_eq!(conv.convert(&buf).unwrap().frame_count(), 3);
        assert_eq!(conv.convert(&buf).unwrap().frame_count(), 2);
        conv.reset();
        assert_eq!(conv.convert(&buf).unwrap().frame_count(), 3);
    }

    #[test]
    fn test_planar_stereo_bytes_interleave() {
        let mut conv = FormatConverter::new(WireFormat {
            sample_rate: 48000,
            channels: 2,
            interleaved: false,
        })
        .unwrap();
        let buf = CaptureBuffer::from_f32(vec![0.5, -0.5, 0.25, 0.0], 2, 48000);
        let frame = conv.convert(&buf).unwrap();
        assert!(!frame.is_interleaved());
        assert_eq!(frame.samples(), &[16384, 8192, -16384, 0]);
        let interleaved: Vec<i16> = frame.interleaved_samples().collect();
        assert_eq!(interleaved, vec![16384, -16384, 8192, 0]);
        assert_eq!(frame.to_bytes().len(), 8);
    }

    #[test]
    fn test_conversion_errors() {
        let mut conv = mono_converter(48000);
        assert_eq!(
            conv.convert(&CaptureBuffer::from_f32(vec![0.0; 3], 2, 48000)),
            Err(ConversionError::RaggedBuffer {
                samples: 3,
                channels: 2
            })
        );
        assert_eq!(
            conv.convert(&CaptureBuffer::from_f32(vec![0.0; 2], 0, 48000)),
            Err(ConversionError::NoChannels)
        );
        assert_eq!(
            conv.convert(&CaptureBuffer::from_f32(vec![0.0; 2], 1, 0)),
            Err(ConversionError::NoSampleRate)
        );
        assert!(FormatConverter::new(WireFormat {
            channels: 3,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_pipeline_preserves_order_and_drops_bad_buffers() {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<AudioFrame>();
        let mut pipeline = ConversionPipeline::start(mono_converter(48000), frame_tx, events_tx);
        let submitter = pipeline.submitter().unwrap();

        for i in 0..20 {
            let value = i as f32 / 100.0;
            assert!(submitter.submit(CaptureBuffer::from_f32(vec![value; 8], 1, 48000)));
            if i == 10 {
                assert!(submitter.submit(CaptureBuffer::from_f32(vec![0.0; 3], 2, 48000)));
            }
        }
        drop(submitter);
        pipeline.stop();

        let frames: Vec<AudioFrame> = frame_rx.try_iter().collect();
        assert_eq!(frames.len(), 20);
        for (i, frame) in frames.iter().enumerate() {
            let expected = to_pcm16(i as f32 / 100.0);
            assert_eq!(frame.samples()[0], expected, "frame {} out of order", i);
        }
        assert_eq!(pipeline.stats().converted(), 20);
        assert_eq!(pipeline.stats().dropped(), 1);

        let dropped = events_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("drop event");
        assert!(matches!(dropped, ProbeEvent::FrameDropped { .. }));
    }

    #[test]
    fn test_pipeline_stop_is_idempotent() {
        let (events_tx, _events_rx) = crossbeam_channel::unbounded();
        let (frame_tx, _frame_rx) = crossbeam_channel::unbounded::<AudioFrame>();
        let mut pipeline = ConversionPipeline::start(FormatConverter::default(), frame_tx, events_tx);
        pipeline.stop();
        pipeline.stop();
        assert!(pipeline.submitter().is_none());
        assert!(!pipeline.is_running());
    }
}
