//! # pupperlink-protocol
//!
//! Wire protocol spoken between the host and the servo/IMU microcontroller.
//!
//! This crate provides:
//! - The COBS/R byte transform used to keep `0x00` out of frame tails
//! - Frame compilation with continuity counter and sum-to-zero checksum
//! - A byte-at-a-time parser that resynchronises on every sync byte
//! - Per-code payload layouts for servo and IMU telemetry
//!
//! Frame layout on the wire:
//!
//! ```text
//! +------+-----------+------------+---------+---------------------------------+
//! | sync | ack | cmd | continuity | length  | COBS/R(code, data..., checksum) |
//! | 0x00 | 1b  | 7b  | 1 byte     | 1 byte  | `length` bytes                  |
//! +------+-----------+------------+---------+---------------------------------+
//! ```

pub mod cobsr;
pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod packet;
pub mod parser;
pub mod payload;

pub use codec::Decoder;
pub use command::{Command, Firmware, PayloadLayout};
pub use error::ProtocolError;
pub use frame::{Cmd, Compiler, ContinuityCounter, Frame};
pub use packet::{verify_checksum, Packet};
pub use parser::{Parser, ParserState};
pub use payload::{ImuAttitude, ImuSixDof, ServoValues, Telemetry};

/// Frame delimiter. Never appears anywhere else in a compiled frame.
pub const SYNC: u8 = 0x00;

/// Number of raw bytes preceding the encoded tail (sync, ack|cmd, continuity, length).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest tail, before or after the transform, that the one-byte length field can describe.
pub const MAX_TAIL_SIZE: usize = 255;

/// Largest `data` section a frame can carry (tail minus code and checksum).
pub const MAX_DATA_SIZE: usize = MAX_TAIL_SIZE - 2;

/// Number of servos addressed by the all-servo commands.
pub const SERVO_COUNT: usize = 12;
