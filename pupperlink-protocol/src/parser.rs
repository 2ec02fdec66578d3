//! Byte-at-a-time frame parser.
//!
//! The parser carries partial-frame state across calls, so input may be split at any
//! byte boundary. A `0x00` byte restarts the frame in every state; a stream corrupted
//! mid-frame recovers at the next sync byte.

use crate::cobsr;
use crate::error::ProtocolError;
use crate::frame::Cmd;
use crate::packet::Packet;
use crate::SYNC;

/// Position of the parser within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Between frames; bytes are discarded until a sync byte arrives.
    Idle,
    AwaitingCmd,
    AwaitingContinuity,
    AwaitingLength,
    /// Collecting the encoded tail.
    CollectingPayload { remaining: usize },
}

/// Header fields gathered before the tail is complete.
#[derive(Debug, Default)]
struct PacketBuilder {
    cmd_byte: u8,
    continuity: u8,
    encoded_len: u8,
    tail: Vec<u8>,
}

impl PacketBuilder {
    fn finish(self) -> Result<Packet, ProtocolError> {
        let (ack, cmd) = Cmd::from_wire(self.cmd_byte);
        let decoded = cobsr::decode(&self.tail)?;
        Packet::from_tail(ack, cmd, self.continuity, self.encoded_len, decoded)
    }
}

/// Reconstructs packets from a byte stream.
///
/// One parser belongs to one connection and must not be shared between readers.
#[derive(Debug)]
pub struct Parser {
    state: ParserState,
    builder: PacketBuilder,
    last_packet: Option<Packet>,
    discarded_bytes: u64,
    frames_started: u64,
    packets_completed: u64,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
            builder: PacketBuilder::default(),
            last_packet: None,
            discarded_bytes: 0,
            frames_started: 0,
            packets_completed: 0,
        }
    }

    /// Consumes one byte.
    ///
    /// Returns the packet the byte completed, if any. A frame whose tail fails to decode
    /// is reported as an error; the parser is back in [`ParserState::Idle`] afterwards and
    /// keeps working.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Packet>, ProtocolError> {
        if byte == SYNC {
            if !matches!(self.state, ParserState::Idle) {
                tracing::trace!(state = ?self.state, "sync inside frame, restarting");
            }
            self.builder = PacketBuilder::default();
            self.state = ParserState::AwaitingCmd;
            self.frames_started += 1;
            return Ok(None);
        }

        match self.state {
            ParserState::Idle => {
                self.discarded_bytes += 1;
                tracing::trace!(byte, "discarding byte outside frame");
            }
            ParserState::AwaitingCmd => {
                self.builder.cmd_byte = byte;
                self.state = ParserState::AwaitingContinuity;
            }
            ParserState::AwaitingContinuity => {
                self.builder.continuity = byte;
                self.state = ParserState::AwaitingLength;
            }
            ParserState::AwaitingLength => {
                let remaining = byte as usize;
                self.builder.encoded_len = byte;
                self.builder.tail.reserve_exact(remaining);
                self.state = ParserState::CollectingPayload { remaining };
            }
            ParserState::CollectingPayload { remaining } => {
                self.builder.tail.push(byte);
                let remaining = remaining - 1;
                if remaining > 0 {
                    self.state = ParserState::CollectingPayload { remaining };
                    return Ok(None);
                }

                self.state = ParserState::Idle;
                let packet = std::mem::take(&mut self.builder).finish()?;
                self.packets_completed += 1;
                self.last_packet = Some(packet.clone());
                return Ok(Some(packet));
            }
        }

        Ok(None)
    }

    /// Returns the current state.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Returns the most recently completed packet.
    pub fn last_packet(&self) -> Option<&Packet> {
        self.last_packet.as_ref()
    }

    /// Bytes dropped because they arrived outside a frame.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Sync bytes seen.
    pub fn frames_started(&self) -> u64 {
        self.frames_started
    }

    /// Packets successfully decoded.
    pub fn packets_completed(&self) -> u64 {
        self.packets_completed
    }

    /// Drops any partial frame and returns to [`ParserState::Idle`].
    pub fn reset(&mut self) {
        self.builder = PacketBuilder::default();
        self.state = ParserState::Idle;
    }
}
