//! Byte <-> UTF-8 transcoding for hybi-00 text frames.
//!
//! hybi-00 frames may only carry UTF-8 text, but MUD output is arbitrary 8-bit
//! data. Each byte is therefore sent as the code point with the same numeric
//! value (U+0000..U+00FF), and incoming code points are folded back to their
//! low byte. This is not a text encoding, it is a reversible byte mapping.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("invalid UTF-8 sequence at payload offset {0}")]
    Invalid(usize),
    #[error("truncated UTF-8 sequence at payload offset {0}")]
    Incomplete(usize),
}

/// Exact number of bytes `encode` will produce for `src`.
pub fn encoded_len(src: &[u8]) -> usize {
    src.iter().map(|b| if *b < 0x80 { 1 } else { 2 }).sum()
}

/// Append the UTF-8 form of every byte in `src` to `dst`.
pub fn encode(src: &[u8], dst: &mut BytesMut) {
    dst.reserve(encoded_len(src));
    for &b in src {
        if b < 0x80 {
            dst.put_u8(b);
        } else {
            dst.put_u8(0xC0 | (b >> 6));
            dst.put_u8(0x80 | (b & 0x3F));
        }
    }
}

/// Append one byte per UTF-8 code point in `src` to `dst`.
///
/// On error nothing is appended.
pub fn decode(src: &[u8], dst: &mut BytesMut) -> Result<(), TranscodeError> {
    let text = std::str::from_utf8(src).map_err(|e| match e.error_len() {
        Some(_) => TranscodeError::Invalid(e.valid_up_to()),
        None => TranscodeError::Incomplete(e.valid_up_to()),
    })?;

    dst.reserve(text.len());
    for c in text.chars() {
        dst.put_u8(u32::from(c) as u8);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ascii_passes_through() {
        let mut out = BytesMut::new();
        encode(b"look north\r\n", &mut out);
        assert_eq!(&out[..], b"look north\r\n");
    }

    #[test]
    fn high_bytes_become_two_byte_sequences() {
        let mut out = BytesMut::new();
        encode(&[0x80, 0xE9, 0xFF], &mut out);
        assert_eq!(&out[..], &[0xC2, 0x80, 0xC3, 0xA9, 0xC3, 0xBF]);
        assert_eq!(encoded_len(&[0x80, 0xE9, 0xFF]), 6);
    }

    #[test]
    fn zero_bytes_survive() {
        let mut wire = BytesMut::new();
        encode(&[b'a', 0, b'b'], &mut wire);
        let mut back = BytesMut::new();
        decode(&wire, &mut back).unwrap();
        assert_eq!(&back[..], &[b'a', 0, b'b']);
    }

    #[test]
    fn wide_code_points_fold_to_low_byte() {
        // U+0141 (Ł) -> 0x41, U+20AC (€) -> 0xAC
        let mut out = BytesMut::new();
        decode("Ł€".as_bytes(), &mut out).unwrap();
        assert_eq!(&out[..], &[0x41, 0xAC]);
    }

    #[test]
    fn rejects_bad_and_truncated_sequences() {
        let mut out = BytesMut::from(&b"x"[..]);
        assert_eq!(decode(&[b'a', 0xFF, b'b'], &mut out), Err(TranscodeError::Invalid(1)));
        assert_eq!(decode(&[b'a', b'b', 0xC3], &mut out), Err(TranscodeError::Incomplete(2)));
        // Overlong encoding of '/'.
        assert!(decode(&[0xC0, 0xAF], &mut out).is_err());
        assert_eq!(&out[..], b"x");
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
            let mut wire = BytesMut::new();
            encode(&data, &mut wire);
            prop_assert_eq!(wire.len(), encoded_len(&data));
            prop_assert!(std::str::from_utf8(&wire).is_ok());

            let mut back = BytesMut::new();
            decode(&wire, &mut back).unwrap();
            prop_assert_eq!(&back[..], &data[..]);
        }
    }
}
