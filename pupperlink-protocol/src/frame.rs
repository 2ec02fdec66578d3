//! Outbound frame compilation.
//!
//! A frame is assembled in its pre-transform form first:
//!
//! ```text
//! [0x00, ack<<7 | cmd, continuity, raw_len(data), code, data..., checksum]
//! ```
//!
//! The checksum makes every byte of that form sum to zero modulo 256. Everything from
//! `code` onward is then COBS/R encoded and the length byte is replaced by the size of
//! the encoded tail.

use crate::cobsr;
use crate::error::ProtocolError;
use crate::{FRAME_HEADER_SIZE, MAX_DATA_SIZE, MAX_TAIL_SIZE, SYNC};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Acknowledge-request flag in the command byte.
const ACK_BIT: u8 = 0x80;

/// Message class carried in the low seven bits of the command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cmd(u8);

impl Cmd {
    /// Read a value from the controller.
    pub const READ: Cmd = Cmd(b'R');
    /// Write a value to the controller.
    pub const WRITE: Cmd = Cmd(b'W');

    /// Creates a command class.
    ///
    /// `0` would read as a sync byte and the top bit belongs to the ack flag.
    pub fn new(value: u8) -> Result<Self, ProtocolError> {
        if value == 0 || value & ACK_BIT != 0 {
            return Err(ProtocolError::InvalidCommand(value));
        }
        Ok(Self(value))
    }

    /// Splits a wire command byte into `(ack, cmd)`.
    pub fn from_wire(byte: u8) -> (bool, Self) {
        (byte & ACK_BIT != 0, Self(byte & !ACK_BIT))
    }

    /// Packs the class and ack flag into one wire byte.
    pub fn to_wire(self, ack: bool) -> u8 {
        if ack {
            self.0 | ACK_BIT
        } else {
            self.0
        }
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn as_char(self) -> char {
        self.0 as char
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Computes the byte that makes `bytes` sum to zero modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// Rolling continuity indicator.
///
/// The internal index runs over `0..254`; the transmitted value is `index + 1`, so `0`
/// is never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContinuityCounter {
    index: u8,
}

impl ContinuityCounter {
    /// Number of distinct values produced by automatic assignment.
    pub const PERIOD: u8 = 254;

    /// Creates a counter at internal index `start % 254`.
    pub fn new(start: u8) -> Self {
        Self {
            index: start % Self::PERIOD,
        }
    }

    /// Advances the counter and returns the byte to transmit.
    ///
    /// `continuity_override == 0` means "next in sequence"; any other value is sent as is
    /// and the sequence continues from it.
    pub fn advance(&mut self, continuity_override: u8) -> u8 {
        self.index = if continuity_override == 0 {
            (self.index + 1) % Self::PERIOD
        } else {
            continuity_override - 1
        };
        self.index.wrapping_add(1)
    }

    /// Returns the most recently transmitted value.
    pub fn current(&self) -> u8 {
        self.index.wrapping_add(1)
    }
}

/// An outbound frame before compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Ask the receiver to acknowledge.
    pub ack: bool,
    /// Message class.
    pub cmd: Cmd,
    /// Explicit continuity value, or `0` to take the next one.
    pub continuity: u8,
    /// Sub-code selecting the payload layout.
    pub code: u8,
    /// Raw payload.
    pub data: Bytes,
}

impl Frame {
    pub fn new(cmd: Cmd, code: u8) -> Self {
        Self {
            ack: false,
            cmd,
            continuity: 0,
            code,
            data: Bytes::new(),
        }
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_ack(mut self) -> Self {
        self.ack = true;
        self
    }

    pub fn with_continuity(mut self, continuity: u8) -> Self {
        self.continuity = continuity;
        self
    }
}

/// Compiles frames and owns the continuity counter for one connection.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    counter: ContinuityCounter,
}

impl Compiler {
    pub fn new(counter: ContinuityCounter) -> Self {
        Self { counter }
    }

    /// Returns the continuity counter.
    pub fn counter(&self) -> &ContinuityCounter {
        &self.counter
    }

    /// Compiles a frame into wire bytes.
    ///
    /// The counter only advances when compilation succeeds.
    pub fn compile(&mut self, frame: &Frame) -> Result<BytesMut, ProtocolError> {
        if frame.data.len() > MAX_DATA_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: frame.data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        let mut counter = self.counter;
        let continuity = counter.advance(frame.continuity);

        let mut raw = Vec::with_capacity(FRAME_HEADER_SIZE + frame.data.len() + 2);
        raw.push(SYNC);
        raw.push(frame.cmd.to_wire(frame.ack));
        raw.push(continuity);
        raw.push(frame.data.len() as u8);
        raw.push(frame.code);
        raw.extend_from_slice(&frame.data);
        raw.push(checksum(&raw));

        let tail = cobsr::encode(&raw[FRAME_HEADER_SIZE..]);
        if tail.len() > MAX_TAIL_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: tail.len(),
                max: MAX_TAIL_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + tail.len());
        buf.put_slice(&raw[..FRAME_HEADER_SIZE - 1]);
        buf.put_u8(tail.len() as u8);
        buf.put_slice(&tail);

        self.counter = counter;
        tracing::trace!(
            cmd = %frame.cmd,
            code = frame.code,
            continuity,
            len = buf.len(),
            "compiled frame"
        );

        Ok(buf)
    }
}
