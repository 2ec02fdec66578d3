//! Buffered stream decoder.

use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::parser::Parser;
use std::collections::VecDeque;

/// Decodes packets from arbitrarily chunked input.
///
/// Bytes go in with [`Decoder::extend`] and finished packets come out of
/// [`Decoder::decode_packet`]. Frames that fail to decode, or whose checksum does not
/// match when verification is on, are dropped, logged and counted.
#[derive(Debug)]
pub struct Decoder {
    parser: Parser,
    ready: VecDeque<Packet>,
    verify_checksums: bool,
    corrupt_frames: u64,
    last_error: Option<ProtocolError>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            ready: VecDeque::new(),
            verify_checksums: true,
            corrupt_frames: 0,
            last_error: None,
        }
    }

    /// Enables or disables checksum verification (on by default).
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Feeds bytes to the parser and queues every packet they complete.
    pub fn extend(&mut self, data: &[u8]) {
        for &byte in data {
            match self.parser.feed(byte) {
                Ok(Some(packet)) => {
                    if self.verify_checksums {
                        if let Err(e) = packet.check() {
                            self.reject(e, Some(&packet));
                            continue;
                        }
                    }
                    self.ready.push_back(packet);
                }
                Ok(None) => {}
                Err(e) => self.reject(e, None),
            }
        }
    }

    fn reject(&mut self, err: ProtocolError, packet: Option<&Packet>) {
        self.corrupt_frames += 1;
        tracing::warn!(
            error = %err,
            code = packet.map(|p| p.code),
            continuity = packet.map(|p| p.continuity),
            "dropping corrupt frame"
        );
        self.last_error = Some(err);
    }

    /// Pops the next decoded packet.
    pub fn decode_packet(&mut self) -> Option<Packet> {
        self.ready.pop_front()
    }

    /// Number of decoded packets waiting.
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Frames dropped since creation.
    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    /// Error behind the most recent dropped frame.
    pub fn last_error(&self) -> Option<&ProtocolError> {
        self.last_error.as_ref()
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Drops queued packets and any partial frame.
    pub fn clear(&mut self) {
        self.ready.clear();
        self.parser.reset();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Cmd, Compiler, Frame};
    use proptest::prelude::*;

    fn stream_of(frames: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut compiler = Compiler::default();
        frames
            .iter()
            .flat_map(|(code, data)| {
                compiler
                    .compile(&Frame::new(Cmd::READ, *code).with_data(data.clone()))
                    .unwrap()
                    .to_vec()
            })
            .collect()
    }

    fn drain(decoder: &mut Decoder) -> Vec<Packet> {
        std::iter::from_fn(|| decoder.decode_packet()).collect()
    }

    #[test]
    fn test_decoder_multiple_packets() {
        let stream = stream_of(&[(0x77, vec![1; 24]), (0x26, b"hello".to_vec()), (0xFE, vec![3])]);
        let mut decoder = Decoder::new();
        decoder.extend(&stream);

        assert_eq!(decoder.pending(), 3);
        let packets = drain(&mut decoder);
        let codes: Vec<u8> = packets.iter().map(|p| p.code).collect();
        assert_eq!(codes, vec![0x77, 0x26, 0xFE]);
        assert_eq!(decoder.pending(), 0);
        assert!(decoder.decode_packet().is_none());
    }

    #[test]
    fn test_decoder_partial_frame() {
        let stream = stream_of(&[(0x27, vec![0x10; 8])]);
        let mut decoder = Decoder::new();

        decoder.extend(&stream[..5]);
        assert!(decoder.decode_packet().is_none());

        decoder.extend(&stream[5..]);
        let packet = decoder.decode_packet().unwrap();
        assert_eq!(packet.code, 0x27);
        assert_eq!(packet.payload.as_ref(), &[0x10; 8]);
    }

    #[test]
    fn test_decoder_drops_bad_checksum() {
        let mut stream = stream_of(&[(0x74, vec![0x01])]);
        // Bumping a non-zero tail byte keeps the frame decodable but breaks the sum
        let last = stream.len() - 1;
        stream[last] = if stream[last] == 0xFF { 0xFE } else { stream[last] + 1 };
        stream.extend_from_slice(&stream_of(&[(0x75, vec![0x01])]));

        let mut decoder = Decoder::new();
        decoder.extend(&stream);

        let packets = drain(&mut decoder);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].code, 0x75);
        assert_eq!(decoder.corrupt_frames(), 1);
        assert!(matches!(
            decoder.last_error(),
            Some(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decoder_without_verification_keeps_packet() {
        let mut stream = stream_of(&[(0x74, vec![0x01])]);
        let last = stream.len() - 1;
        stream[last] = if stream[last] == 0xFF { 0xFE } else { stream[last] + 1 };

        let mut decoder = Decoder::new().with_checksum_verification(false);
        decoder.extend(&stream);
        let packet = decoder.decode_packet().unwrap();
        assert!(!packet.verify_checksum());
        assert_eq!(decoder.corrupt_frames(), 0);
    }

    #[test]
    fn test_decoder_clear() {
        let stream = stream_of(&[(0x77, vec![]), (0x78, vec![])]);
        let mut decoder = Decoder::new();
        decoder.extend(&stream[..stream.len() - 1]);
        assert_eq!(decoder.pending(), 1);

        decoder.clear();
        assert_eq!(decoder.pending(), 0);
        decoder.extend(&stream[stream.len() - 1..]);
        assert!(decoder.decode_packet().is_none());
    }

    proptest! {
        #[test]
        fn prop_split_feed_invariance(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..=60), 1..6),
            chunk in 1usize..32,
        ) {
            let frames: Vec<(u8, Vec<u8>)> = payloads
                .into_iter()
                .enumerate()
                .map(|(i, p)| (0x70 + i as u8, p))
                .collect();
            let stream = stream_of(&frames);

            let mut bytewise = Decoder::new();
            for &b in &stream {
                bytewise.extend(&[b]);
            }

            let mut chunked = Decoder::new();
            for piece in stream.chunks(chunk) {
                chunked.extend(piece);
            }

            let a = drain(&mut bytewise);
            let b = drain(&mut chunked);
            prop_assert_eq!(a.len(), frames.len());
            prop_assert_eq!(a, b);
        }
    }
}
