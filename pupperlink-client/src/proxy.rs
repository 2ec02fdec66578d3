//! Client for the servo proxy daemon.
//!
//! The daemon owns the controller link and accepts fixed-layout requests over a
//! `SOCK_SEQPACKET` socket. Every request is one message and every reply is one message
//! beginning with a two byte header.

use crate::error::ClientError;
use crate::transport::SeqPacketStream;
use pupperlink_protocol::SERVO_COUNT;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Well-known socket path of the proxy daemon.
pub const DEFAULT_PROXY_SOCKET: &str = "/tmp/9Lq7BNBnBycd6nxy.socket";

/// Size of a request or reply carrying twelve servo words.
pub const SERVO_MESSAGE_SIZE: usize = 2 + 2 * SERVO_COUNT;

const SHORT_MESSAGE_SIZE: u8 = 2;

/// Proxy request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyOpcode {
    SetPositions = 0x01,
    GetPositions = 0x02,
    GetLoads = 0x03,
}

impl ProxyOpcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Client for the proxy daemon.
pub struct ProxyClient<S = SeqPacketStream> {
    stream: S,
    timeout: Duration,
}

impl ProxyClient<SeqPacketStream> {
    /// Connects to the daemon socket at `path`.
    pub async fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, ClientError> {
        let stream = SeqPacketStream::connect(path).await?;
        Ok(Self::new(stream, timeout))
    }
}

impl<S> ProxyClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Commands all twelve servo positions.
    pub async fn set_positions(&mut self, positions: &[u16; SERVO_COUNT]) -> Result<(), ClientError> {
        let mut message = Vec::with_capacity(SERVO_MESSAGE_SIZE);
        message.push(SERVO_MESSAGE_SIZE as u8);
        message.push(ProxyOpcode::SetPositions.as_byte());
        for position in positions {
            message.extend_from_slice(&position.to_le_bytes());
        }

        let header = [SHORT_MESSAGE_SIZE, ProxyOpcode::SetPositions.as_byte()];
        self.round_trip(&message, header, header.len())
            .await
            .map(|_| ())
    }

    /// Reads all twelve servo positions.
    pub async fn get_positions(&mut self) -> Result<[i16; SERVO_COUNT], ClientError> {
        self.get_words(ProxyOpcode::GetPositions).await
    }

    /// Reads all twelve servo loads.
    pub async fn get_loads(&mut self) -> Result<[i16; SERVO_COUNT], ClientError> {
        self.get_words(ProxyOpcode::GetLoads).await
    }

    /// Consumes the client and returns the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn get_words(&mut self, opcode: ProxyOpcode) -> Result<[i16; SERVO_COUNT], ClientError> {
        let request = [SHORT_MESSAGE_SIZE, opcode.as_byte()];
        let reply = self
            .round_trip(
                &request,
                [SERVO_MESSAGE_SIZE as u8, opcode.as_byte()],
                SERVO_MESSAGE_SIZE,
            )
            .await?;

        let mut words = [0i16; SERVO_COUNT];
        for (word, chunk) in words.iter_mut().zip(reply[2..].chunks_exact(2)) {
            *word = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(words)
    }

    async fn round_trip(
        &mut self,
        request: &[u8],
        header: [u8; 2],
        reply_len: usize,
    ) -> Result<Vec<u8>, ClientError> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(request).await?;
            self.stream.flush().await?;
            read_reply(&mut self.stream, header, reply_len).await
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }
}

/// Reads one reply message. A reply is a single datagram, so anything shorter than
/// `reply_len` is rejected rather than topped up from the next message.
async fn read_reply<S: AsyncRead + Unpin>(
    stream: &mut S,
    header: [u8; 2],
    reply_len: usize,
) -> Result<Vec<u8>, ClientError> {
    let mut reply = vec![0u8; reply_len];
    let n = stream.read(&mut reply).await?;
    if n == 0 {
        return Err(ClientError::TransportClosed);
    }
    if n < reply_len || reply[..2] != header {
        reply.truncate(n);
        tracing::warn!(expected = ?header, actual = ?reply, "proxy reply rejected");
        return Err(ClientError::InvalidAck {
            expected: header,
            actual: reply,
        });
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    async fn expect_request(daemon: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        daemon.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    fn word_reply(opcode: ProxyOpcode, words: &[i16; SERVO_COUNT]) -> Vec<u8> {
        let mut reply = vec![SERVO_MESSAGE_SIZE as u8, opcode.as_byte()];
        for word in words {
            reply.extend_from_slice(&word.to_le_bytes());
        }
        reply
    }

    #[tokio::test]
    async fn test_set_positions_request_layout() {
        let (client_side, mut daemon) = duplex(256);
        let mut proxy = ProxyClient::new(client_side, Duration::from_secs(1));

        let positions = [500u16, 501, 502, 503, 504, 505, 506, 507, 508, 509, 510, 511];
        let daemon_task = tokio::spawn(async move {
            let mut expected = vec![26u8, 0x01];
            for p in positions {
                expected.extend_from_slice(&p.to_le_bytes());
            }
            expect_request(&mut daemon, &expected).await;
            daemon.write_all(&[2, 1]).await.unwrap();
            daemon
        });

        proxy.set_positions(&positions).await.unwrap();
        daemon_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_positions() {
        let (client_side, mut daemon) = duplex(256);
        let mut proxy = ProxyClient::new(client_side, Duration::from_secs(1));

        let words = [-3i16, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 1023];
        let daemon_task = tokio::spawn(async move {
            expect_request(&mut daemon, &[2, 2]).await;
            daemon
                .write_all(&word_reply(ProxyOpcode::GetPositions, &words))
                .await
                .unwrap();
            daemon
        });

        assert_eq!(proxy.get_positions().await.unwrap(), words);
        daemon_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_loads_over_seqpacket() {
        let (client_side, mut daemon) = SeqPacketStream::pair().unwrap();
        let mut proxy = ProxyClient::new(client_side, Duration::from_secs(1));

        let words = [-100i16; SERVO_COUNT];
        let daemon_task = tokio::spawn(async move {
            let mut request = [0u8; 8];
            let n = daemon.read(&mut request).await.unwrap();
            assert_eq!(&request[..n], &[2, 3]);
            daemon
                .write_all(&word_reply(ProxyOpcode::GetLoads, &words))
                .await
                .unwrap();
            daemon
        });

        assert_eq!(proxy.get_loads().await.unwrap(), words);
        daemon_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_short_reply_is_invalid_ack() {
        let (client_side, mut daemon) = SeqPacketStream::pair().unwrap();
        let mut proxy = ProxyClient::new(client_side, Duration::from_secs(1));

        let words = [7i16; SERVO_COUNT];
        let daemon_task = tokio::spawn(async move {
            let mut request = [0u8; 8];
            daemon.read(&mut request).await.unwrap();
            let reply = word_reply(ProxyOpcode::GetLoads, &words);
            daemon.write_all(&reply[..10]).await.unwrap();
            daemon.write_all(&reply).await.unwrap();
            daemon
        });

        match proxy.get_loads().await.unwrap_err() {
            ClientError::InvalidAck { expected, actual } => {
                assert_eq!(expected, [26, 3]);
                assert_eq!(actual.len(), 10);
            }
            other => panic!("expected InvalidAck, got {:?}", other),
        }
        daemon_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_header_is_invalid_ack() {
        let (client_side, mut daemon) = duplex(256);
        let mut proxy = ProxyClient::new(client_side, Duration::from_secs(1));

        let daemon_task = tokio::spawn(async move {
            expect_request(&mut daemon, &[2, 2]).await;
            daemon.write_all(&[2, 9]).await.unwrap();
            daemon
        });

        let err = proxy.get_positions().await.unwrap_err();
        match err {
            ClientError::InvalidAck { expected, actual } => {
                assert_eq!(expected, [26, 2]);
                assert_eq!(actual, vec![2, 9]);
            }
            other => panic!("expected InvalidAck, got {:?}", other),
        }
        daemon_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_daemon_times_out() {
        let (client_side, _daemon) = duplex(256);
        let mut proxy = ProxyClient::new(client_side, Duration::from_millis(50));

        let err = proxy.get_loads().await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }

    #[tokio::test]
    async fn test_closed_daemon() {
        let (client_side, daemon) = duplex(256);
        drop(daemon);
        let mut proxy = ProxyClient::new(client_side, Duration::from_secs(1));

        let err = proxy.get_positions().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
