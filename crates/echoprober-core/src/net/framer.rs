//! Delimiter-framed duplex TCP client
//!
//! Every outbound unit (a text command or one PCM frame) is written as its
//! payload followed by a separate write of `\r\n`. There is no length prefix:
//! receivers find frame ends by scanning for the delimiter (see
//! [`FrameDecoder`]).
//!
//! All writes to one connection go through a single writer thread, so
//! concurrent senders (the conversion thread and the text path) never
//! interleave partial frames. The queue is bounded: PCM frames are dropped
//! when it is full, text waits up to the write timeout for room. Socket
//! writes time out too, so a peer that stops reading cannot stall the
//! client or grow its memory. A dedicated reader thread reports inbound data
//! as [`ProbeEvent`]s and exits when the connection closes or when
//! [`NetworkClient::disconnect`] raises its stop flag.

use crate::audio::convert::{AudioFrame, FrameSink};
use crate::error::ProbeError;
use crate::event::{EventSender, ProbeEvent};
use crate::FRAME_DELIMITER;
use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long the reader and writer block before re-checking the stop flag
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long disconnect waits for queued sends to flush
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Outbound units queued behind the writer before PCM frames are dropped
const SEND_QUEUE_DEPTH: usize = 32;

/// When the delimiter follows a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterPolicy {
    /// Write the delimiter even after a failed payload write (legacy wire behavior)
    Always,
    /// Write the delimiter only after the payload went out
    #[default]
    OnPayloadSuccess,
}

/// Connection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerOptions {
    pub connect_timeout: Duration,
    /// Upper bound on bytes taken per read
    pub read_chunk: usize,
    pub delimiter: DelimiterPolicy,
    /// Queued units before frames are dropped
    pub send_queue: usize,
    /// Bound on one socket write, and on how long text waits for queue room
    pub write_timeout: Duration,
}

impl Default for FramerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            read_chunk: 10 * 1024,
            delimiter: DelimiterPolicy::default(),
            send_queue: SEND_QUEUE_DEPTH,
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// One read's worth of inbound bytes, tagged by content
///
/// Valid UTF-8 is text; anything else is binary data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Data(Vec<u8>),
}

impl Inbound {
    pub fn classify(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Text(text.to_string()),
            Err(_) => Self::Data(bytes.to_vec()),
        }
    }

    fn into_event(self) -> ProbeEvent {
        match self {
            Self::Text(text) => ProbeEvent::TextReceived { text },
            Self::Data(bytes) => ProbeEvent::DataReceived { bytes: bytes.len() },
        }
    }
}

enum Outbound {
    Text(String),
    Frame(Vec<u8>),
}

/// Byte counters for one connection
#[derive(Debug, Default)]
pub struct LinkStats {
    units_sent: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_dropped: AtomicU64,
}

impl LinkStats {
    /// Payloads fully written, delimiter excluded
    pub fn units_sent(&self) -> u64 {
        self.units_sent.load(Ordering::Relaxed)
    }

    /// Bytes written including delimiters
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Frames refused because the outbound queue was full
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Connected probe client
pub struct NetworkClient {
    peer: SocketAddr,
    stream: TcpStream,
    outbound: Option<Sender<Outbound>>,
    stop: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    write_timeout: Duration,
    writer: Option<JoinHandle<()>>,
    writer_done: crossbeam_channel::Receiver<()>,
    reader: Option<JoinHandle<()>>,
}

impl NetworkClient {
    /// Single connection attempt bounded by `options.connect_timeout`
    pub fn connect(
        host: &str,
        port: u16,
        options: &FramerOptions,
        events: EventSender,
    ) -> Result<Self, ProbeError> {
        let label = format!("{}:{}", host, port);
        let connect_err = |source| ProbeError::Connect {
            addr: label.clone(),
            source,
        };

        let peer = (host, port)
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })?;

        let stream = TcpStream::connect_timeout(&peer, options.connect_timeout).map_err(connect_err)?;
        let _ = stream.set_nodelay(true);
        stream
            .set_read_timeout(Some(READ_POLL_INTERVAL))
            .map_err(connect_err)?;
        stream
            .set_write_timeout(Some(options.write_timeout))
            .map_err(connect_err)?;
        let write_half = stream.try_clone().map_err(connect_err)?;
        let read_half = stream.try_clone().map_err(connect_err)?;

        tracing::info!(peer = %peer, "Connected");

        let stop = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(LinkStats::default());

        let (outbound_tx, outbound_rx) =
            crossbeam_channel::bounded::<Outbound>(options.send_queue.max(1));
        let (done_tx, writer_done) = crossbeam_channel::bounded::<()>(1);
        let writer_stop = Arc::clone(&stop);
        let writer_stats = Arc::clone(&stats);
        let writer_events = events.clone();
        let policy = options.delimiter;
        let writer = std::thread::Builder::new()
            .name("net-writer".into())
            .spawn(move || {
                write_loop(write_half, outbound_rx, policy, writer_stop, writer_stats, writer_events);
                let _ = done_tx.send(());
            })
            .expect("Failed to spawn network writer thread");

        let reader_stop = Arc::clone(&stop);
        let reader_open = Arc::clone(&open);
        let reader_stats = Arc::clone(&stats);
        let chunk = options.read_chunk.max(1);
        let reader = std::thread::Builder::new()
            .name("net-reader".into())
            .spawn(move || {
                read_loop(read_half, chunk, reader_stop, reader_open, reader_stats, events);
            })
            .expect("Failed to spawn network reader thread");

        Ok(Self {
            peer,
            stream,
            outbound: Some(outbound_tx),
            stop,
            open,
            stats,
            write_timeout: options.write_timeout,
            writer: Some(writer),
            writer_done,
            reader: Some(reader),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// False after disconnect or once the peer closed the connection
    pub fn is_connected(&self) -> bool {
        self.outbound.is_some() && self.open.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Queue a text command; its delimiter follows it on the wire
    ///
    /// Waits up to the write timeout for queue room.
    pub fn send_text(&self, text: &str) -> Result<(), ProbeError> {
        let tx = self.outbound.as_ref().ok_or(ProbeError::NotConnected)?;
        match tx.send_timeout(Outbound::Text(text.to_string()), self.write_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(ProbeError::QueueFull),
            Err(SendTimeoutError::Disconnected(_)) => Err(ProbeError::NotConnected),
        }
    }

    /// Queue a binary payload; its delimiter follows it on the wire
    ///
    /// Never blocks: fails with [`ProbeError::QueueFull`] when the writer is
    /// behind.
    pub fn send_bytes(&self, bytes: Vec<u8>) -> Result<(), ProbeError> {
        let tx = self.outbound.as_ref().ok_or(ProbeError::NotConnected)?;
        enqueue_frame(tx, &self.stats, bytes)
    }

    /// Sink that streams converted capture frames over this connection
    pub fn frame_sink(&self) -> Result<NetworkFrameSink, ProbeError> {
        let tx = self.outbound.clone().ok_or(ProbeError::NotConnected)?;
        Ok(NetworkFrameSink {
            tx,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Close the connection and join both threads; no-op when already closed
    ///
    /// Sends queued before the call get a short window to flush. Frame sinks
    /// still held elsewhere keep the writer alive only until that window ends.
    pub fn disconnect(&mut self) {
        let Some(outbound) = self.outbound.take() else {
            return;
        };
        drop(outbound);
        if self.writer_done.recv_timeout(FLUSH_TIMEOUT).is_err() {
            tracing::warn!(peer = %self.peer, "Outbound queue did not flush before disconnect");
        }

        self.stop.store(true, Ordering::Release);
        self.open.store(false, Ordering::Release);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                tracing::debug!(error = %e, "Socket shutdown failed");
            }
        }

        if let Some(h) = self.writer.take() {
            let _ = h.join();
        }
        if let Some(h) = self.reader.take() {
            let _ = h.join();
        }

        tracing::info!(
            peer = %self.peer,
            sent = self.stats.bytes_sent(),
            received = self.stats.bytes_received(),
            "Disconnected"
        );
    }
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn enqueue_frame(tx: &Sender<Outbound>, stats: &LinkStats, bytes: Vec<u8>) -> Result<(), ProbeError> {
    match tx.try_send(Outbound::Frame(bytes)) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Outbound queue full, dropping frame");
            Err(ProbeError::QueueFull)
        }
        Err(TrySendError::Disconnected(_)) => Err(ProbeError::NotConnected),
    }
}

/// [`FrameSink`] writing PCM frames to a [`NetworkClient`]
///
/// A full outbound queue rejects the frame; the conversion pipeline reports
/// it as a dropped frame.
#[derive(Clone)]
pub struct NetworkFrameSink {
    tx: Sender<Outbound>,
    stats: Arc<LinkStats>,
}

impl FrameSink for NetworkFrameSink {
    fn deliver(&mut self, frame: AudioFrame) -> Result<(), ProbeError> {
        enqueue_frame(&self.tx, &self.stats, frame.to_bytes())
    }
}

/// Outcome of writing one unit
#[derive(Debug)]
struct UnitWrite {
    payload: std::io::Result<()>,
    /// `None` when the delimiter was skipped
    delimiter: Option<std::io::Result<()>>,
}

/// Payload, then the delimiter as a separate write when `policy` allows it
fn write_unit<W: Write>(out: &mut W, payload: &[u8], policy: DelimiterPolicy) -> UnitWrite {
    let payload_result = out.write_all(payload);
    let delimiter = if payload_result.is_ok() || policy == DelimiterPolicy::Always {
        Some(out.write_all(&FRAME_DELIMITER))
    } else {
        None
    };
    UnitWrite {
        payload: payload_result,
        delimiter,
    }
}

fn write_loop(
    mut stream: TcpStream,
    rx: crossbeam_channel::Receiver<Outbound>,
    policy: DelimiterPolicy,
    stop: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    events: EventSender,
) {
    loop {
        let unit = match rx.recv_timeout(READ_POLL_INTERVAL) {
            Ok(unit) => unit,
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if stop.load(Ordering::Acquire) {
            break;
        }
        let (payload, text) = match unit {
            Outbound::Text(text) => (text.clone().into_bytes(), Some(text)),
            Outbound::Frame(bytes) => (bytes, None),
        };

        let written = write_unit(&mut stream, &payload, policy);
        let payload_ok = match written.payload {
            Ok(()) => {
                stats.units_sent.fetch_add(1, Ordering::Relaxed);
                stats.bytes_sent.fetch_add(payload.len() as u64, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = payload.len(), "Payload send failed");
                let _ = events.send(ProbeEvent::SendFailed {
                    reason: e.to_string(),
                });
                false
            }
        };

        match written.delimiter {
            Some(Ok(())) => {
                stats
                    .bytes_sent
                    .fetch_add(FRAME_DELIMITER.len() as u64, Ordering::Relaxed);
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Delimiter send failed");
                let _ = events.send(ProbeEvent::SendFailed {
                    reason: e.to_string(),
                });
                continue;
            }
            None => {}
        }

        if payload_ok {
            let event = match text {
                Some(text) => ProbeEvent::TextSent { text },
                None => ProbeEvent::FrameSent {
                    bytes: payload.len(),
                },
            };
            tracing::trace!(%event, "Unit sent");
            let _ = events.send(event);
        }
    }
    let _ = stream.flush();
}

fn read_loop(
    mut stream: TcpStream,
    chunk: usize,
    stop: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    events: EventSender,
) {
    let mut buf = vec![0u8; chunk];
    tracing::debug!("Network reader running");

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match stream.read(&mut buf) {
            Ok(0) => {
                open.store(false, Ordering::Release);
                if !stop.load(Ordering::Acquire) {
                    tracing::info!("Connection closed by peer");
                    let _ = events.send(ProbeEvent::ConnectionClosed);
                }
                break;
            }
            Ok(n) => {
                stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                let _ = events.send(Inbound::classify(&buf[..n]).into_event());
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                open.store(false, Ordering::Release);
                if !stop.load(Ordering::Acquire) {
                    tracing::warn!(error = %e, "Network read failed");
                    let _ = events.send(ProbeEvent::ReadFailed {
                        reason: e.to_string(),
                    });
                }
                break;
            }
        }
    }

    open.store(false, Ordering::Release);
    tracing::debug!("Network reader stopped");
}

/// Splits a received byte stream into delimiter-terminated frames
///
/// Payloads that themselves contain `\r\n` are split there too; the wire
/// format carries no length to tell them apart.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning every frame completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let scan_from = self.pending.len().saturating_sub(1);
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut i = scan_from;
        while i + 1 < self.pending.len() {
            if self.pending[i] == FRAME_DELIMITER[0] && self.pending[i + 1] == FRAME_DELIMITER[1] {
                frames.push(self.pending[start..i].to_vec());
                i += 2;
                start = i;
            } else {
                i += 1;
            }
        }
        self.pending.drain(..start);
        frames
    }

    /// Bytes received after the last delimiter
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_classify_inbound() {
        assert_eq!(Inbound::classify(b"ack"), Inbound::Text("ack".into()));
        assert_eq!(
            Inbound::classify(&[0xff, 0x00, 0x10]),
            Inbound::Data(vec![0xff, 0x00, 0x10])
        );
        // Long text stays text
        let long = "x".repeat(500);
        assert_eq!(Inbound::classify(long.as_bytes()), Inbound::Text(long));
    }

    #[test]
    fn test_decoder_split_across_chunks() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"sta").is_empty());
        assert!(dec.push(b"rt\r").is_empty());
        assert_eq!(dec.push(b"\nab\r\ncd"), vec![b"start".to_vec(), b"ab".to_vec()]);
        assert_eq!(dec.pending(), b"cd");
        assert_eq!(dec.push(b"\r\n"), vec![b"cd".to_vec()]);
        assert!(dec.pending().is_empty());
    }

    #[test]
    fn test_decoder_empty_frame() {
        let mut dec = FrameDecoder::new();
        assert_eq!(dec.push(b"\r\n\r\n"), vec![Vec::<u8>::new(), Vec::new()]);
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let (tx, _rx) = crossbeam_channel::unbounded();
        let result = NetworkClient::connect("127.0.0.1", port, &FramerOptions::default(), tx);
        assert!(matches!(result, Err(ProbeError::Connect { .. })));
    }

    /// Rejects the first `fail` writes, then records everything
    struct FlakyWriter {
        fail: usize,
        written: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail > 0 {
                self.fail -= 1;
                return Err(std::io::Error::new(ErrorKind::BrokenPipe, "peer gone"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_payload_with_always_policy_still_delimits() {
        let mut out = FlakyWriter {
            fail: 1,
            written: Vec::new(),
        };
        let result = write_unit(&mut out, b"start", DelimiterPolicy::Always);
        assert!(result.payload.is_err());
        assert!(matches!(result.delimiter, Some(Ok(()))));
        assert_eq!(out.written, b"\r\n");
    }

    #[test]
    fn test_failed_payload_skips_delimiter_by_default() {
        let mut out = FlakyWriter {
            fail: 1,
            written: Vec::new(),
        };
        let result = write_unit(&mut out, b"start", DelimiterPolicy::OnPayloadSuccess);
        assert!(result.payload.is_err());
        assert!(result.delimiter.is_none());
        assert!(out.written.is_empty());
    }

    #[test]
    fn test_successful_unit_is_payload_then_delimiter() {
        let mut out = FlakyWriter {
            fail: 0,
            written: Vec::new(),
        };
        let result = write_unit(&mut out, &[1, 0, 2, 0], DelimiterPolicy::OnPayloadSuccess);
        assert!(result.payload.is_ok());
        assert!(matches!(result.delimiter, Some(Ok(()))));
        assert_eq!(out.written, vec![1, 0, 2, 0, b'\r', b'\n']);
    }

    #[test]
    fn test_stalled_peer_bounds_outbound_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let options = FramerOptions {
            send_queue: 4,
            write_timeout: Duration::from_millis(200),
            ..FramerOptions::default()
        };
        let mut client = NetworkClient::connect("127.0.0.1", port, &options, tx).unwrap();
        // Accepted but never read
        let _server = listener.accept().unwrap();

        let frame = vec![0u8; 9600];
        let mut accepted = 0;
        let mut refused = 0;
        for _ in 0..5000 {
            match client.send_bytes(frame.clone()) {
                Ok(()) => accepted += 1,
                Err(ProbeError::QueueFull) => refused += 1,
                Err(e) => panic!("unexpected send error: {}", e),
            }
        }
        assert!(refused > 0, "a stalled peer must eventually refuse frames");
        assert_eq!(client.stats().frames_dropped(), refused);
        assert!(accepted < 5000);
        client.disconnect();
    }

    #[test]
    fn test_send_after_disconnect_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut client =
            NetworkClient::connect("127.0.0.1", port, &FramerOptions::default(), tx).unwrap();
        let _server = listener.accept().unwrap();

        assert!(client.is_connected());
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert!(matches!(client.send_text("late"), Err(ProbeError::NotConnected)));
        assert!(client.frame_sink().is_err());
    }
}
