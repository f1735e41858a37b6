//! cpal-backed capture source and playback sink
//!
//! cpal streams are not `Send` on every platform, so each stream lives on its
//! own thread for as long as it runs. The handles here only hold the thread
//! and a stop channel, which keeps them usable as session collaborators.

use crate::audio::convert::CaptureBuffer;
use crate::audio::wav::WavBuffer;
use crate::error::ProbeError;
use crate::session::io::{CaptureCallback, CaptureFormat, CaptureSource, PlaybackSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Running stream thread
struct StreamWorker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    /// Spawn `open` on a named thread and wait until its stream is playing
    fn spawn<F>(name: &str, open: F) -> Result<Self, ProbeError>
    where
        F: FnOnce() -> Result<cpal::Stream, ProbeError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), ProbeError>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || match open() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .expect("Failed to spawn audio stream thread");

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop_tx, handle }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(ProbeError::Device("audio stream thread exited".into()))
            }
        }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

fn device_err(context: &str, e: impl std::fmt::Display) -> ProbeError {
    ProbeError::Device(format!("{}: {}", context, e))
}

fn input_device() -> Result<Device, ProbeError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| ProbeError::Device("no input device".into()))
}

fn output_device() -> Result<Device, ProbeError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| ProbeError::Device("no output device".into()))
}

/// Default microphone
pub struct CpalCapture {
    buffer_frames: u32,
    worker: Option<StreamWorker>,
}

impl CpalCapture {
    /// Capture in buffers of `buffer_frames` when the device allows a fixed size
    pub fn new(buffer_frames: u32) -> Self {
        Self {
            buffer_frames,
            worker: None,
        }
    }
}

impl CaptureSource for CpalCapture {
    fn native_format(&self) -> Result<CaptureFormat, ProbeError> {
        let config = input_device()?
            .default_input_config()
            .map_err(|e| device_err("input config", e))?;
        Ok(CaptureFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    fn start(&mut self, callback: CaptureCallback) -> Result<(), ProbeError> {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        let buffer_frames = self.buffer_frames;
        let worker = StreamWorker::spawn("audio-capture", move || {
            open_input(buffer_frames, callback)
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
            tracing::info!("Capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input(buffer_frames: u32, mut callback: CaptureCallback) -> Result<cpal::Stream, ProbeError> {
    let device = input_device()?;
    let default = device
        .default_input_config()
        .map_err(|e| device_err("input config", e))?;
    let channels = default.channels();
    let rate = default.sample_rate().0;
    let format = default.sample_format();

    let fixed_ok = match default.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => (*min..=*max).contains(&buffer_frames),
        cpal::SupportedBufferSize::Unknown => false,
    };
    let mut config = default.config();
    if fixed_ok {
        config.buffer_size = cpal::BufferSize::Fixed(buffer_frames);
    }

    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        rate,
        channels,
        format = ?format,
        buffer_frames,
        "Opening capture stream"
    );

    let on_error = |err: cpal::StreamError| tracing::error!("Input stream error: {}", err);
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                callback(CaptureBuffer::from_f32(data.to_vec(), channels, rate));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                callback(CaptureBuffer::from_i16(data.to_vec(), channels, rate));
            },
            on_error,
            None,
        ),
        other => {
            return Err(ProbeError::Device(format!(
                "unsupported capture sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| device_err("build input stream", e))?;

    stream.play().map_err(|e| device_err("start capture", e))?;
    Ok(stream)
}

/// Default speaker, looping the prepared probe
///
/// Pausing keeps the loop position; the next `play` resumes from it.
pub struct CpalPlayback {
    /// Interleaved left/right
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
    sample_rate: u32,
    worker: Option<StreamWorker>,
}

impl CpalPlayback {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(Vec::new()),
            position: Arc::new(AtomicUsize::new(0)),
            sample_rate,
            worker: None,
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn prepare(&mut self, wav: &WavBuffer) -> Result<(), ProbeError> {
        self.pause();
        // File order is right then left
        let samples: Vec<f32> = wav
            .frames()
            .flat_map(|[right, left]| [left as f32 / 32768.0, right as f32 / 32768.0])
            .collect();
        if samples.is_empty() {
            return Err(ProbeError::Device("probe waveform is empty".into()));
        }
        self.samples = Arc::new(samples);
        self.position.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn play(&mut self) -> Result<(), ProbeError> {
        if self.worker.is_some() {
            return Ok(());
        }
        if self.samples.is_empty() {
            return Err(ProbeError::Device("playback not prepared".into()));
        }
        let samples = Arc::clone(&self.samples);
        let position = Arc::clone(&self.position);
        let sample_rate = self.sample_rate;
        self.worker = Some(StreamWorker::spawn("audio-playback", move || {
            open_output(sample_rate, samples, position)
        })?);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
            tracing::info!("Playback paused");
        }
    }

    fn is_playing(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.pause();
    }
}

fn open_output(
    sample_rate: u32,
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
) -> Result<cpal::Stream, ProbeError> {
    let device = output_device()?;
    let default = device
        .default_output_config()
        .map_err(|e| device_err("output config", e))?;
    let channels = default.channels() as usize;
    let config = StreamConfig {
        channels: default.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        rate = sample_rate,
        channels,
        "Opening playback stream"
    );

    let frames = samples.len() / 2;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let left = samples[pos * 2];
                    let right = samples[pos * 2 + 1];
                    match frame.len() {
                        1 => frame[0] = 0.5 * (left + right),
                        _ => {
                            frame[0] = left;
                            frame[1] = right;
                            for ch in frame.iter_mut().skip(2) {
                                *ch = 0.0;
                            }
                        }
                    }
                    pos = (pos + 1) % frames;
                }
                position.store(pos, Ordering::Relaxed);
            },
            |err| tracing::error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| device_err("build output stream", e))?;

    stream.play().map_err(|e| device_err("start playback", e))?;
    Ok(stream)
}
