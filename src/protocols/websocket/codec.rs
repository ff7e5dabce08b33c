use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::transcode;

pub const FRAME_START: u8 = 0x00;
pub const FRAME_END: u8 = 0xFF;

/// hybi-00 text framing: `0x00 <utf-8 payload> 0xFF`.
///
/// Payloads are passed through the byte transcoder in both directions, so the
/// codec deals in raw bytes on the application side.
#[derive(Clone, Debug, Default)]
pub struct Hybi00Codec;

impl Hybi00Codec {
    pub fn new() -> Self {
        Hybi00Codec
    }

    /// Wire size of the frame `encode` would build for `payload`.
    pub fn framed_len(payload: &[u8]) -> usize {
        transcode::encoded_len(payload) + 2
    }

    /// Decode every complete frame in `src`, appending their payloads to `dst`.
    ///
    /// An unterminated tail is left at the start of `src` for the next read.
    /// Returns the number of frames consumed.
    pub fn decode_all(&mut self, src: &mut BytesMut, dst: &mut BytesMut) -> io::Result<usize> {
        let mut frames = 0;
        while let Some(payload) = self.decode(src)? {
            dst.put(payload);
            frames += 1;
        }
        Ok(frames)
    }
}

impl Encoder<&[u8]> for Hybi00Codec {
    type Error = io::Error;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(Self::framed_len(item));
        dst.put_u8(FRAME_START);
        transcode::encode(item, dst);
        dst.put_u8(FRAME_END);
        Ok(())
    }
}

impl Decoder for Hybi00Codec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let end = match src.iter().position(|b| *b == FRAME_END) {
            Some(end) => end,
            None => return Ok(None),
        };

        let frame = src.split_to(end + 1);
        let body = &frame[..end];
        let skip = body.iter().take_while(|b| **b == FRAME_START).count();

        let mut payload = BytesMut::with_capacity(body.len() - skip);
        transcode::decode(&body[skip..], &mut payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        Hybi00Codec::new().encode(payload, &mut out).unwrap();
        out
    }

    #[test]
    fn encodes_one_frame() {
        let out = frame(&[b'h', b'i', 0xE9]);
        assert_eq!(&out[..], &[0x00, b'h', b'i', 0xC3, 0xA9, 0xFF]);
        assert_eq!(Hybi00Codec::framed_len(&[b'h', b'i', 0xE9]), out.len());
    }

    #[test]
    fn drains_every_complete_frame_in_one_call() {
        let mut src = frame(b"one");
        src.extend_from_slice(&frame(b"two"));
        src.extend_from_slice(&[0x00, b't', b'h']);

        let mut dst = BytesMut::new();
        let frames = Hybi00Codec::new().decode_all(&mut src, &mut dst).unwrap();
        assert_eq!(frames, 2);
        assert_eq!(&dst[..], b"onetwo");
        assert_eq!(&src[..], &[0x00, b't', b'h']);
    }

    #[test]
    fn split_terminator_is_buffered_until_it_arrives() {
        let wire = frame(&[b'a', 0xE9, b'b']);
        let (first, second) = wire.split_at(4);
        let mut codec = Hybi00Codec::new();
        let mut src = BytesMut::from(first);
        let mut dst = BytesMut::new();

        assert_eq!(codec.decode_all(&mut src, &mut dst).unwrap(), 0);
        assert!(dst.is_empty());
        assert_eq!(&src[..], first);

        src.extend_from_slice(second);
        assert_eq!(codec.decode_all(&mut src, &mut dst).unwrap(), 1);
        assert_eq!(&dst[..], &[b'a', 0xE9, b'b']);
        assert!(src.is_empty());
    }

    #[test]
    fn invalid_payload_is_an_error() {
        let mut src = BytesMut::from(&[0x00, b'a', 0xC3, 0x28, 0xFF][..]);
        let mut dst = BytesMut::new();
        let err = Hybi00Codec::new().decode_all(&mut src, &mut dst).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(dst.is_empty());
    }

    #[test]
    fn empty_frames_yield_nothing() {
        let mut src = BytesMut::from(&[0x00, 0xFF, 0xFF][..]);
        let mut dst = BytesMut::new();
        assert_eq!(Hybi00Codec::new().decode_all(&mut src, &mut dst).unwrap(), 2);
        assert!(dst.is_empty());
        assert!(src.is_empty());
    }
}
