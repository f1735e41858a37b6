//! Capture-to-file recording for offline sessions
//!
//! [`PcmFileCapture`] runs the same conversion pipeline as online streaming,
//! but the sink is a buffered file instead of the network: the result is the
//! raw wire-format PCM stream, exactly the bytes an online session would have
//! sent minus the delimiters.

use super::io::{CaptureSource, FileCapture};
use crate::audio::convert::{AudioFrame, ConversionPipeline, FormatConverter, FrameSink};
use crate::error::ProbeError;
use crate::event::EventSender;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type SharedWriter = Arc<Mutex<BufWriter<File>>>;

/// [`FrameSink`] appending frame bytes to a file
pub struct PcmFileSink {
    path: PathBuf,
    writer: SharedWriter,
    written: Arc<AtomicU64>,
}

impl FrameSink for PcmFileSink {
    fn deliver(&mut self, frame: AudioFrame) -> Result<(), ProbeError> {
        let bytes = frame.to_bytes();
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer
            .write_all(&bytes)
            .map_err(|e| ProbeError::file(&self.path, e))?;
        self.written.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

struct ActiveRecording {
    path: PathBuf,
    pipeline: ConversionPipeline,
    writer: SharedWriter,
    written: Arc<AtomicU64>,
}

/// [`FileCapture`] that converts a capture source's buffers into a PCM file
pub struct PcmFileCapture {
    source: Box<dyn CaptureSource>,
    converter: FormatConverter,
    events: EventSender,
    active: Option<ActiveRecording>,
}

impl PcmFileCapture {
    pub fn new(source: Box<dyn CaptureSource>, converter: FormatConverter, events: EventSender) -> Self {
        Self {
            source,
            converter,
            events,
            active: None,
        }
    }

    /// Path of the file being recorded
    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    pub fn bytes_written(&self) -> u64 {
        self.active
            .as_ref()
            .map(|a| a.written.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl FileCapture for PcmFileCapture {
    fn start(&mut self, path: &Path) -> Result<(), ProbeError> {
        if self.active.is_some() {
            self.stop()?;
        }

        let file = File::create(path).map_err(|e| ProbeError::file(path, e))?;
        let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(file)));
        let written = Arc::new(AtomicU64::new(0));

        let sink = PcmFileSink {
            path: path.to_path_buf(),
            writer: Arc::clone(&writer),
            written: Arc::clone(&written),
        };
        let mut pipeline = ConversionPipeline::start(self.converter.clone(), sink, self.events.clone());
        let Some(submitter) = pipeline.submitter() else {
            return Err(ProbeError::Device("conversion pipeline not running".into()));
        };

        if let Err(e) = self.source.start(Box::new(move |buffer| {
            submitter.submit(buffer);
        })) {
            pipeline.stop();
            let _ = std::fs::remove_file(path);
            return Err(e);
        }

        tracing::info!(path = %path.display(), "Recording capture to file");
        self.active = Some(ActiveRecording {
            path: path.to_path_buf(),
            pipeline,
            writer,
            written,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<u64, ProbeError> {
        let Some(mut active) = self.active.take() else {
            return Ok(0);
        };

        self.source.stop();
        active.pipeline.stop();

        let mut writer = active.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer
            .flush()
            .map_err(|e| ProbeError::file(&active.path, e))?;

        let written = active.written.load(Ordering::Relaxed);
        tracing::info!(
            path = %active.path.display(),
            bytes = written,
            "Capture file closed"
        );
        Ok(written)
    }

    fn is_recording(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for PcmFileCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Failed to finish capture file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::convert::{CaptureBuffer, WireFormat};
    use crate::session::io::{CaptureFeed, CaptureFormat, ChannelCapture};

    fn recorder() -> (PcmFileCapture, CaptureFeed) {
        let (capture, feed) = ChannelCapture::new(CaptureFormat {
            sample_rate: 48000,
            channels: 1,
        });
        let (events, _rx) = crossbeam_channel::unbounded();
        let converter = FormatConverter::new(WireFormat::default()).unwrap();
        (PcmFileCapture::new(Box::new(capture), converter, events), feed)
    }

    #[test]
    fn test_records_raw_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.pcm");
        let (mut rec, feed) = recorder();

        rec.start(&path).unwrap();
        assert!(rec.is_recording());
        assert!(feed.push(CaptureBuffer::from_i16(vec![1, -2], 1, 48000)));
        assert!(feed.push(CaptureBuffer::from_i16(vec![256], 1, 48000)));
        let written = rec.stop().unwrap();

        assert_eq!(written, 6);
        assert!(!rec.is_recording());
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x00, 0x01]);
        assert!(!feed.push(CaptureBuffer::from_i16(vec![1], 1, 48000)));
    }

    #[test]
    fn test_start_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rec, _feed) = recorder();
        let err = rec.start(&dir.path().join("nope").join("x.pcm")).unwrap_err();
        assert!(matches!(err, ProbeError::File { .. }));
        assert!(!rec.is_recording());
    }

    #[test]
    fn test_stop_when_idle() {
        let (mut rec, _feed) = recorder();
        assert_eq!(rec.stop().unwrap(), 0);
    }
}
