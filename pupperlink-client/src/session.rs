//! Request/response session.
//!
//! A session owns one transport, the continuity counter and the stream decoder. Each
//! request holds the session lock from compiling the frame until its response arrives,
//! so there is never more than one command in flight. Anything received before a request
//! is sent is discarded, so a late reply to an abandoned request never answers a newer one.

use crate::error::ClientError;
use bytes::Bytes;
use pupperlink_protocol::command::CODE_TEXT;
use pupperlink_protocol::{Cmd, Compiler, ContinuityCounter, Decoder, Firmware, Frame, Packet};
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::Poll;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::Mutex;

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256;

/// Minimum read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 16;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Reads spent discarding stale input before a request is sent.
const MAX_STALE_READS: usize = 8;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on waiting for a matching response.
    pub request_timeout: Duration,
    /// Bytes read from the transport per call.
    pub read_buffer_size: usize,
    /// Code table of the attached controller.
    pub firmware: Firmware,
    /// Drop packets whose checksum does not verify.
    pub verify_checksums: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_millis(500),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            firmware: Firmware::Current,
            verify_checksums: true,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_firmware(mut self, firmware: Firmware) -> Self {
        self.firmware = firmware;
        self
    }

    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// Counters describing a session's traffic.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_sent: AtomicU64,
    packets_received: AtomicU64,
    unexpected_codes: AtomicU64,
    corrupt_frames: AtomicU64,
    stale_packets: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub packets_received: u64,
    pub unexpected_codes: u64,
    pub corrupt_frames: u64,
    /// Packets that arrived while no request was waiting for them.
    pub stale_packets: u64,
    pub timeouts: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            unexpected_codes: self.unexpected_codes.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            stale_packets: self.stale_packets.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

struct Inner<S> {
    stream: S,
    compiler: Compiler,
    decoder: Decoder,
    buf: Vec<u8>,
}

/// A request/response session over one transport.
pub struct Session<S> {
    config: ConnectionConfig,
    inner: Mutex<Inner<S>>,
    stats: SessionStats,
    closed: AtomicBool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a session with the continuity counter at a random starting point.
    pub fn new(stream: S, config: ConnectionConfig) -> Self {
        Self::with_counter(stream, config, ContinuityCounter::new(rand::random()))
    }

    /// Creates a session with an explicit continuity counter.
    pub fn with_counter(stream: S, config: ConnectionConfig, counter: ContinuityCounter) -> Self {
        let decoder = Decoder::new().with_checksum_verification(config.verify_checksums);
        let buf = vec![0u8; config.read_buffer_size];
        Self {
            inner: Mutex::new(Inner {
                stream,
                compiler: Compiler::new(counter),
                decoder,
                buf,
            }),
            config,
            stats: SessionStats::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn firmware(&self) -> Firmware {
        self.config.firmware
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Returns whether the transport is still usable.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Sends `cmd`/`code` with `data` and waits for the next packet carrying `code`.
    pub async fn execute(&self, cmd: Cmd, code: u8, data: &[u8]) -> Result<Packet, ClientError> {
        let frame = Frame::new(cmd, code).with_data(Bytes::copy_from_slice(data));
        self.execute_frame(&frame).await
    }

    /// Sends a prepared frame and waits for the next packet carrying its code.
    ///
    /// Packets with other codes that arrive in the meantime are logged, counted and
    /// skipped. Fails with [`ClientError::Timeout`] if the write and the matching read do
    /// not complete within the configured bound.
    pub async fn execute_frame(&self, frame: &Frame) -> Result<Packet, ClientError> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }

        let mut inner = self.inner.lock().await;
        let wire = inner.compiler.compile(frame)?;
        let continuity = inner.compiler.counter().current();

        match tokio::time::timeout(
            self.config.request_timeout,
            self.exchange(&mut inner, frame, &wire, continuity),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(code = frame.code, continuity, "request timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    async fn exchange(
        &self,
        inner: &mut Inner<S>,
        frame: &Frame,
        wire: &[u8],
        continuity: u8,
    ) -> Result<Packet, ClientError> {
        self.discard_stale(inner).await?;

        if let Err(e) = write_frame(&mut inner.stream, wire).await {
            return Err(self.transport_error(e));
        }
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            cmd = %frame.cmd,
            code = frame.code,
            continuity,
            bytes = wire.len(),
            "frame sent"
        );

        self.read_until(inner, frame.code).await
    }

    /// Drops everything received before the next request goes out: queued packets, a
    /// partial frame, and bytes the transport already has ready.
    async fn discard_stale(&self, inner: &mut Inner<S>) -> Result<(), ClientError> {
        let Inner {
            stream,
            decoder,
            buf,
            ..
        } = inner;

        for _ in 0..MAX_STALE_READS {
            match read_ready(stream, buf).await {
                None | Some(Ok(0)) => break,
                Some(Ok(n)) => decoder.extend(&buf[..n]),
                Some(Err(e)) => return Err(self.transport_error(e)),
            }
        }

        let mut stale = 0;
        while let Some(packet) = decoder.decode_packet() {
            stale += 1;
            if packet.code == CODE_TEXT {
                tracing::info!(
                    text = %String::from_utf8_lossy(&packet.payload),
                    "controller message"
                );
            } else {
                tracing::debug!(
                    code = packet.code,
                    continuity = packet.continuity,
                    "discarding stale packet"
                );
            }
        }
        decoder.clear();

        if stale > 0 {
            self.stats.stale_packets.fetch_add(stale, Ordering::Relaxed);
        }
        self.stats
            .corrupt_frames
            .store(decoder.corrupt_frames(), Ordering::Relaxed);
        Ok(())
    }

    async fn read_until(&self, inner: &mut Inner<S>, code: u8) -> Result<Packet, ClientError> {
        loop {
            while let Some(packet) = inner.decoder.decode_packet() {
                self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                if packet.code == code {
                    tracing::debug!(
                        code,
                        continuity = packet.continuity,
                        len = packet.payload.len(),
                        "response received"
                    );
                    return Ok(packet);
                }
                self.skip(&packet);
            }

            let Inner {
                stream,
                decoder,
                buf,
                ..
            } = &mut *inner;
            let n = match stream.read(buf).await {
                Ok(n) => n,
                Err(e) => return Err(self.transport_error(e)),
            };
            if n == 0 {
                tracing::info!("transport closed by peer");
                self.closed.store(true, Ordering::SeqCst);
                return Err(ClientError::TransportClosed);
            }
            tracing::trace!(bytes = n, "read from transport");

            decoder.extend(&buf[..n]);
            self.stats
                .corrupt_frames
                .store(decoder.corrupt_frames(), Ordering::Relaxed);
        }
    }

    fn skip(&self, packet: &Packet) {
        self.stats.unexpected_codes.fetch_add(1, Ordering::Relaxed);
        if packet.code == CODE_TEXT {
            tracing::info!(
                text = %String::from_utf8_lossy(&packet.payload),
                "controller message"
            );
        } else {
            tracing::debug!(
                code = packet.code,
                continuity = packet.continuity,
                "skipping packet with unexpected code"
            );
        }
    }

    fn transport_error(&self, e: std::io::Error) -> ClientError {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
                self.closed.store(true, Ordering::SeqCst);
                ClientError::TransportClosed
            }
            _ => ClientError::Io(e),
        }
    }

    /// Shuts the transport down. Later requests fail with [`ClientError::NotConnected`].
    pub async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        inner.decoder.clear();
        inner.stream.shutdown().await?;
        tracing::debug!("session closed");
        Ok(())
    }
}

async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, wire: &[u8]) -> std::io::Result<()> {
    stream.write_all(wire).await?;
    stream.flush().await
}

/// Reads whatever the stream has ready without waiting. `None` means nothing was ready.
async fn read_ready<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
) -> Option<std::io::Result<usize>> {
    std::future::poll_fn(|cx| {
        let mut read_buf = ReadBuf::new(&mut *buf);
        match Pin::new(&mut *stream).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Some(Ok(read_buf.filled().len()))),
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Ready(None),
        }
    })
    .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pupperlink_protocol::payload;
    use tokio::io::DuplexStream;

    /// Compiles a controller reply the way the firmware frames it.
    pub(crate) fn reply(cmd: Cmd, code: u8, data: &[u8]) -> Vec<u8> {
        Compiler::new(ContinuityCounter::new(9))
            .compile(&Frame::new(cmd, code).with_data(Bytes::copy_from_slice(data)))
            .unwrap()
            .to_vec()
    }

    /// Bytes the session will send for its first request with a counter at zero.
    pub(crate) fn request(cmd: Cmd, code: u8, data: &[u8]) -> Vec<u8> {
        Compiler::default()
            .compile(&Frame::new(cmd, code).with_data(Bytes::copy_from_slice(data)))
            .unwrap()
            .to_vec()
    }

    pub(crate) fn scripted<S>(stream: S) -> Session<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Session::with_counter(stream, ConnectionConfig::new(), ContinuityCounter::default())
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new();
        assert_eq!(config.request_timeout, Duration::from_millis(500));
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.firmware, Firmware::Current);
        assert!(config.verify_checksums);
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new().with_read_buffer_size(1);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new().with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_execute_matches_code() {
        let positions = [512u16; 12];
        let data = payload::positions_payload(&positions);
        let mock = tokio_test::io::Builder::new()
            .write(&request(Cmd::WRITE, 0x76, &data))
            .read(&reply(Cmd::WRITE, 0x76, &[]))
            .build();

        let session = scripted(mock);
        let packet = session.execute(Cmd::WRITE, 0x76, &data).await.unwrap();
        assert_eq!(packet.code, 0x76);

        let stats = session.stats().snapshot();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.unexpected_codes, 0);
    }

    #[tokio::test]
    async fn test_execute_skips_unexpected_codes() {
        let mut noise = reply(Cmd::READ, 0x26, b"boot ok");
        noise.extend_from_slice(&reply(Cmd::READ, 0x78, &[0; 24]));
        let answer: Vec<u8> = (1u16..=12).flat_map(|v| v.to_le_bytes()).collect();

        let mock = tokio_test::io::Builder::new()
            .write(&request(Cmd::READ, 0x77, &[]))
            .read(&noise)
            .read(&reply(Cmd::READ, 0x77, &answer))
            .build();

        let session = scripted(mock);
        let packet = session.execute(Cmd::READ, 0x77, &[]).await.unwrap();
        assert_eq!(packet.payload.as_ref(), &answer[..]);
        assert_eq!(session.stats().snapshot().unexpected_codes, 2);
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let answer = reply(Cmd::READ, 0x74, &[1]);
        let (head, tail) = answer.split_at(3);
        let mock = tokio_test::io::Builder::new()
            .write(&request(Cmd::READ, 0x74, &[]))
            .read(head)
            .read(tail)
            .build();

        let session = scripted(mock);
        let packet = session.execute(Cmd::READ, 0x74, &[]).await.unwrap();
        assert_eq!(packet.payload.as_ref(), &[1]);
    }

    #[tokio::test]
    async fn test_queued_packet_does_not_answer_next_request() {
        let mut both = reply(Cmd::READ, 0x74, &[1]);
        both.extend_from_slice(&reply(Cmd::READ, 0x75, &[0]));

        let mut second = Compiler::default();
        second.compile(&Frame::new(Cmd::READ, 0x74)).unwrap();
        let second_request = second.compile(&Frame::new(Cmd::READ, 0x75)).unwrap();

        let mock = tokio_test::io::Builder::new()
            .write(&request(Cmd::READ, 0x74, &[]))
            .read(&both)
            .write(&second_request)
            .read(&reply(Cmd::READ, 0x75, &[2]))
            .build();

        let session = scripted(mock);
        session.execute(Cmd::READ, 0x74, &[]).await.unwrap();
        let packet = session.execute(Cmd::READ, 0x75, &[]).await.unwrap();
        assert_eq!(packet.payload.as_ref(), &[2]);
        assert_eq!(session.stats().snapshot().stale_packets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_timeout_is_discarded() {
        let (client, mut controller) = tokio::io::duplex(1024);
        let session = Session::with_counter(
            client,
            ConnectionConfig::new().with_request_timeout(Duration::from_millis(50)),
            ContinuityCounter::default(),
        );

        let result = session.execute(Cmd::READ, 0x77, &[]).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        controller
            .write_all(&reply(Cmd::READ, 0x77, &[1, 1]))
            .await
            .unwrap();

        // Answers once the second request arrives.
        let answer = tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 64];
            let mut requests = 0;
            while requests < 2 {
                let n = controller.read(&mut buf).await.unwrap();
                decoder.extend(&buf[..n]);
                while decoder.decode_packet().is_some() {
                    requests += 1;
                }
            }
            controller
                .write_all(&reply(Cmd::READ, 0x77, &[2, 2]))
                .await
                .unwrap();
            controller
        });

        let packet = session.execute(Cmd::READ, 0x77, &[]).await.unwrap();
        assert_eq!(packet.payload.as_ref(), &[2, 2]);

        let stats = session.stats().snapshot();
        assert_eq!(stats.stale_packets, 1);
        assert_eq!(stats.timeouts, 1);
        answer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_write_is_bounded() {
        let (client, _controller) = tokio::io::duplex(8);
        let session = Session::with_counter(
            client,
            ConnectionConfig::new().with_request_timeout(Duration::from_millis(50)),
            ContinuityCounter::default(),
        );

        let data = [0x11u8; 64];
        let result = session.execute(Cmd::WRITE, 0x76, &data).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        assert_eq!(session.stats().snapshot().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_skipped() {
        let mut bad = reply(Cmd::READ, 0x77, &[1, 2]);
        let last = bad.len() - 1;
        bad[last] = if bad[last] == 0xFF { 0xFE } else { bad[last] + 1 };
        let mut stream = bad;
        stream.extend_from_slice(&reply(Cmd::READ, 0x77, &[3, 4]));

        let mock = tokio_test::io::Builder::new()
            .write(&request(Cmd::READ, 0x77, &[]))
            .read(&stream)
            .build();

        let session = scripted(mock);
        let packet = session.execute(Cmd::READ, 0x77, &[]).await.unwrap();
        assert_eq!(packet.payload.as_ref(), &[3, 4]);
        assert_eq!(session.stats().snapshot().corrupt_frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_no_response() {
        let (client, _controller): (DuplexStream, DuplexStream) = tokio::io::duplex(1024);
        let session = scripted(client);

        let result = session.execute(Cmd::READ, 0x77, &[]).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        assert_eq!(session.stats().snapshot().timeouts, 1);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_transport_closed() {
        let (client, controller) = tokio::io::duplex(1024);
        drop(controller);
        let session = scripted(client);

        let result = session.execute(Cmd::READ, 0x77, &[]).await;
        assert!(matches!(result, Err(ClientError::TransportClosed)));
        assert!(!session.is_open());

        let result = session.execute(Cmd::READ, 0x77, &[]).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_payload_too_large_is_protocol_error() {
        let (client, _controller) = tokio::io::duplex(1024);
        let session = scripted(client);
        let result = session.execute(Cmd::WRITE, 0x76, &[1u8; 300]).await;
        assert!(matches!(result, Err(ClientError::Protocol(_))));
        assert_eq!(session.stats().snapshot().frames_sent, 0);
    }
}
