//! COBS/R byte transform.
//!
//! Consistent Overhead Byte Stuffing, "Reduced" variant. Every `0x00` in the input is
//! replaced by a length code pointing at the next one, so the output never contains a
//! zero. The reduced variant saves one byte in the common case: when the last input byte
//! is at least as large as the final length code, that byte is emitted in place of the
//! code and dropped from the end.
//!
//! No terminator is appended; frames carry an explicit length instead.

use crate::error::ProtocolError;

/// Length code marking a full 254-byte run with no implied zero.
const MAX_RUN_CODE: u8 = 0xFF;

/// Upper bound on the encoded size of `len` input bytes.
pub fn max_encoded_len(len: usize) -> usize {
    len + len / 254 + 1
}

/// Encodes `data`. The output contains no zero bytes.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(max_encoded_len(data.len()));
    let mut start = 0;

    for (idx, &byte) in data.iter().enumerate() {
        if idx - start == 0xFE {
            out.push(MAX_RUN_CODE);
            out.extend_from_slice(&data[start..idx]);
            start = idx;
        }
        if byte == 0 {
            out.push((idx - start + 1) as u8);
            out.extend_from_slice(&data[start..idx]);
            start = idx + 1;
        }
    }

    let final_byte = data.last().copied().unwrap_or(0);
    let length_code = data.len() - start + 1;
    if (final_byte as usize) < length_code {
        out.push(length_code as u8);
        out.extend_from_slice(&data[start..]);
    } else {
        // Final byte doubles as the length code.
        out.push(final_byte);
        out.extend_from_slice(&data[start..data.len() - 1]);
    }

    out
}

/// Decodes a COBS/R sequence produced by [`encode`].
///
/// Fails with [`ProtocolError::CorruptFrame`] if the input contains a zero byte, which
/// no well-formed encoding does.
pub fn decode(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(data.len());
    let mut idx = 0;

    while idx < data.len() {
        let code = data[idx];
        if code == 0 {
            return Err(ProtocolError::CorruptFrame("zero length code in encoded tail"));
        }
        idx += 1;

        let end = idx + code as usize - 1;
        let run = &data[idx..end.min(data.len())];
        if run.contains(&0) {
            return Err(ProtocolError::CorruptFrame("zero byte in encoded tail"));
        }
        out.extend_from_slice(run);
        idx = end;

        if idx > data.len() {
            // Reduced form: the length code was the final data byte.
            out.push(code);
            break;
        }
        if idx < data.len() && code < MAX_RUN_CODE {
            out.push(0);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(encode(&[]), vec![0x01]);
        assert_eq!(decode(&[0x01]).unwrap(), Vec::<u8>::new());
        assert_eq!(decode(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_single_zero() {
        let encoded = encode(&[0x00]);
        assert_eq!(encoded, vec![0x01, 0x01]);
        assert_eq!(decode(&encoded).unwrap(), vec![0x00]);
    }

    #[test]
    fn test_plain_cobs_when_final_byte_small() {
        assert_eq!(encode(&[0x11, 0x00, 0x01]), vec![0x02, 0x11, 0x02, 0x01]);
    }

    #[test]
    fn test_reduced_form_when_final_byte_large() {
        // 0x05 >= length code 2, so it replaces the code
        assert_eq!(encode(&[0x05]), vec![0x05]);
        assert_eq!(decode(&[0x05]).unwrap(), vec![0x05]);

        assert_eq!(encode(&[0x11, 0x22, 0x33]), vec![0x33, 0x11, 0x22]);
        assert_eq!(decode(&[0x33, 0x11, 0x22]).unwrap(), vec![0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_long_run_without_zero() {
        let data = vec![0x01; 300];
        let encoded = encode(&data);
        assert!(!encoded.contains(&0));
        assert_eq!(encoded[0], 0xFF);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_run_boundary_with_large_final_byte() {
        let data = vec![0xFF; 255];
        let encoded = encode(&data);
        assert!(!encoded.contains(&0));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_all_zero_input() {
        let data = vec![0u8; 64];
        let encoded = encode(&data);
        assert_eq!(encoded.len(), 65);
        assert!(encoded.iter().all(|&b| b == 0x01));
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_zero_bytes() {
        assert!(matches!(
            decode(&[0x00, 0x01]),
            Err(ProtocolError::CorruptFrame(_))
        ));
        assert!(matches!(
            decode(&[0x03, 0x00, 0x01]),
            Err(ProtocolError::CorruptFrame(_))
        ));
    }

    #[test]
    fn test_max_encoded_len_bounds_output() {
        for len in [0usize, 1, 253, 254, 255, 508, 600] {
            let data = vec![0x01; len];
            assert!(encode(&data).len() <= max_encoded_len(len));
        }
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=250)) {
            let encoded = encode(&data);
            prop_assert!(!encoded.contains(&0));
            prop_assert_eq!(decode(&encoded).unwrap(), data);
        }

        #[test]
        fn prop_roundtrip_zero_heavy(data in proptest::collection::vec(prop_oneof![Just(0u8), any::<u8>()], 0..=600)) {
            prop_assert_eq!(decode(&encode(&data)).unwrap(), data);
        }
    }
}
