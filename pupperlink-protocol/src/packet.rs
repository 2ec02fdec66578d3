//! Decoded inbound packets.

use crate::error::ProtocolError;
use crate::frame::{checksum, Cmd};
use bytes::Bytes;

/// A complete frame after the tail has been decoded.
///
/// Packets are immutable; the parser assembles them in a private builder and only hands
/// out finished values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Acknowledge flag from the command byte.
    pub ack: bool,
    /// Message class.
    pub cmd: Cmd,
    /// Continuity value as received.
    pub continuity: u8,
    /// Length byte as received (size of the encoded tail).
    pub encoded_len: u8,
    /// Sub-code selecting the payload layout.
    pub code: u8,
    /// Decoded payload between the code and the checksum.
    pub payload: Bytes,
    /// Checksum byte as received.
    pub checksum: u8,
}

impl Packet {
    /// Splits a decoded tail `[code, payload..., checksum]` into a packet.
    pub(crate) fn from_tail(
        ack: bool,
        cmd: Cmd,
        continuity: u8,
        encoded_len: u8,
        mut tail: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        if tail.len() < 2 {
            return Err(ProtocolError::CorruptFrame(
                "decoded tail shorter than code and checksum",
            ));
        }
        let checksum = tail.pop().unwrap_or_default();
        let code = tail[0];
        let payload = Bytes::from(tail).slice(1..);

        Ok(Self {
            ack,
            cmd,
            continuity,
            encoded_len,
            code,
            payload,
            checksum,
        })
    }

    /// Recomputes the checksum the sender should have appended.
    ///
    /// The sum covers the pre-transform form from the command byte through the payload,
    /// including the raw payload length the sender wrote before encoding.
    pub fn expected_checksum(&self) -> u8 {
        let header = [
            self.cmd.to_wire(self.ack),
            self.continuity,
            self.payload.len() as u8,
            self.code,
        ];
        let partial = checksum(&header);
        partial.wrapping_add(checksum(&self.payload))
    }

    /// Returns whether the received checksum matches.
    pub fn verify_checksum(&self) -> bool {
        self.expected_checksum() == self.checksum
    }

    /// Like [`Packet::verify_checksum`] but reports the mismatch.
    pub fn check(&self) -> Result<(), ProtocolError> {
        let expected = self.expected_checksum();
        if expected != self.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: self.checksum,
            });
        }
        Ok(())
    }
}

/// Returns whether `packet` carries a valid sum-to-zero checksum.
pub fn verify_checksum(packet: &Packet) -> bool {
    packet.verify_checksum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cobsr;
    use crate::frame::{Compiler, Frame};
    use crate::FRAME_HEADER_SIZE;

    fn packet_from_wire(wire: &[u8]) -> Packet {
        let (ack, cmd) = Cmd::from_wire(wire[1]);
        let tail = cobsr::decode(&wire[FRAME_HEADER_SIZE..]).unwrap();
        Packet::from_tail(ack, cmd, wire[2], wire[3], tail).unwrap()
    }

    #[test]
    fn test_from_tail_splits_fields() {
        let packet =
            Packet::from_tail(false, Cmd::READ, 7, 5, vec![0x77, 0x01, 0x02, 0x03, 0xAA])
                .unwrap();
        assert_eq!(packet.code, 0x77);
        assert_eq!(packet.payload.as_ref(), &[0x01, 0x02, 0x03]);
        assert_eq!(packet.checksum, 0xAA);
        assert_eq!(packet.continuity, 7);
        assert_eq!(packet.encoded_len, 5);
    }

    #[test]
    fn test_from_tail_minimal() {
        let packet = Packet::from_tail(true, Cmd::WRITE, 1, 2, vec![0x70, 0x10]).unwrap();
        assert!(packet.payload.is_empty());
        assert!(packet.ack);
    }

    #[test]
    fn test_from_tail_too_short() {
        assert!(matches!(
            Packet::from_tail(false, Cmd::READ, 1, 1, vec![0x70]),
            Err(ProtocolError::CorruptFrame(_))
        ));
        assert!(matches!(
            Packet::from_tail(false, Cmd::READ, 1, 1, vec![]),
            Err(ProtocolError::CorruptFrame(_))
        ));
    }

    #[test]
    fn test_compiled_frame_verifies() {
        let mut compiler = Compiler::default();
        for data in [vec![], vec![0u8; 24], vec![0x12, 0x00, 0xFF]] {
            let wire = compiler
                .compile(&Frame::new(Cmd::WRITE, 0x76).with_data(data))
                .unwrap();
            let packet = packet_from_wire(&wire);
            assert!(packet.verify_checksum());
            assert!(verify_checksum(&packet));
            assert!(packet.check().is_ok());
        }
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut compiler = Compiler::default();
        let wire = compiler
            .compile(&Frame::new(Cmd::READ, 0x77).with_data(vec![1, 2, 3, 4]))
            .unwrap();
        let mut packet = packet_from_wire(&wire);
        packet.checksum = packet.checksum.wrapping_add(1);

        assert!(!packet.verify_checksum());
        match packet.check() {
            Err(ProtocolError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(actual, expected.wrapping_add(1));
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }
}
