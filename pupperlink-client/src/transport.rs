//! Byte transports to the controller and the proxy daemon.
//!
//! Every transport is driven through the reactor with non-blocking descriptors, so
//! dropping a pending read or write leaves nothing running behind it.

use crate::config::{TransportConfig, TransportKind};
use nix::sys::socket::{self, AddressFamily, MsgFlags, SockFlag, SockType, UnixAddr};
use nix::sys::termios::{self, BaudRate, SetArg};
use pin_project_lite::pin_project;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UnixStream;

pin_project! {
    /// A duplex byte stream to the controller: either the serial device or a UNIX socket
    /// bridged onto it.
    #[project = TransportProj]
    pub enum Transport {
        Serial { port: SerialPort },
        Unix { #[pin] stream: UnixStream },
    }
}

impl Transport {
    /// Opens the serial device in raw mode at `baud_rate`.
    pub async fn open_serial(path: impl AsRef<Path>, baud_rate: u32) -> io::Result<Self> {
        let port = SerialPort::open(path)?;
        port.configure(baud_rate)?;
        Ok(Transport::Serial { port })
    }

    /// Connects to a stream socket carrying the framed protocol.
    pub async fn connect_unix(path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Transport::Unix { stream })
    }

    /// Opens whichever transport the configuration names.
    pub async fn open(config: &TransportConfig) -> io::Result<Self> {
        match config.kind {
            TransportKind::Serial => {
                tracing::info!(
                    device = %config.device.display(),
                    baud_rate = config.baud_rate,
                    "opening serial transport"
                );
                Self::open_serial(&config.device, config.baud_rate).await
            }
            TransportKind::Unix => {
                tracing::info!(path = %config.socket_path.display(), "connecting unix transport");
                Self::connect_unix(&config.socket_path).await
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Serial { .. } => TransportKind::Serial,
            Transport::Unix { .. } => TransportKind::Unix,
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Serial { port } => Pin::new(port).poll_read(cx, buf),
            TransportProj::Unix { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            TransportProj::Serial { port } => Pin::new(port).poll_write(cx, buf),
            TransportProj::Unix { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Serial { port } => Pin::new(port).poll_flush(cx),
            TransportProj::Unix { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Serial { port } => Pin::new(port).poll_shutdown(cx),
            TransportProj::Unix { stream } => stream.poll_shutdown(cx),
        }
    }
}

/// A serial device opened non-blocking.
#[derive(Debug)]
pub struct SerialPort {
    fd: AsyncFd<File>,
}

impl SerialPort {
    /// Opens the device without making it the controlling terminal.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK | nix::libc::O_NOCTTY)
            .open(path)?;
        tracing::debug!(device = %path.display(), "serial device opened");

        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }

    /// Puts the line in raw 8N1 mode at `baud_rate`.
    pub fn configure(&self, baud_rate: u32) -> io::Result<()> {
        let rate = BaudRate::try_from(baud_rate).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {}", baud_rate),
            )
        })?;

        let file = self.fd.get_ref();
        let mut settings = termios::tcgetattr(file)?;
        termios::cfmakeraw(&mut settings);
        termios::cfsetspeed(&mut settings, rate)?;
        termios::tcsetattr(file, SetArg::TCSANOW, &settings)?;
        Ok(())
    }
}

impl AsyncRead for SerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for SerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A connected `SOCK_SEQPACKET` UNIX socket.
///
/// Every write is sent as one message and every read returns at most one message; bytes
/// beyond the read buffer are discarded by the kernel.
#[derive(Debug)]
pub struct SeqPacketStream {
    fd: AsyncFd<OwnedFd>,
}

impl SeqPacketStream {
    pub async fn connect(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let fd = socket::socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )?;
        let addr = UnixAddr::new(path)?;
        // Local sockets complete the connection immediately unless the backlog is full
        socket::connect(fd.as_raw_fd(), &addr)?;
        tracing::debug!(path = %path.display(), "seqpacket socket connected");

        Ok(Self {
            fd: AsyncFd::new(fd)?,
        })
    }

    /// Returns a connected pair of sockets.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = socket::socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )?;
        Ok((
            Self {
                fd: AsyncFd::new(a)?,
            },
            Self {
                fd: AsyncFd::new(b)?,
            },
        ))
    }
}

impl AsyncRead for SeqPacketStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                socket::recv(inner.as_raw_fd(), unfilled, MsgFlags::empty()).map_err(io::Error::from)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for SeqPacketStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                socket::send(inner.as_raw_fd(), buf, MsgFlags::MSG_NOSIGNAL)
                    .map_err(io::Error::from)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = socket::shutdown(self.fd.as_raw_fd(), socket::Shutdown::Write)
            .map_err(io::Error::from);
        Poll::Ready(result)
    }
}
