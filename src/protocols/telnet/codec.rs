use tokio_util::codec::Decoder;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use super::codes;

// What a Telnet client's byte stream breaks down into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetEvent {
    // WILL|WONT|DO|DONT <OPTION>
    Negotiate(u8, u8),

    // IAC SB <OPTION> <DATA> IAC SE
    SubNegotiate(u8, Bytes),

    // Plain data, with IAC IAC already collapsed to a single 0xFF.
    Data(Bytes),

    // An IAC <command> other than those involved in negotiation and sub-options.
    Command(u8)
}

/// Splits IAC sequences out of client input.
///
/// Only the menu uses this; once a connection is relaying, bytes pass through
/// untouched so the game can run its own negotiation.
#[derive(Clone, Debug)]
pub struct TelnetCodec {
    max_buffer: usize,
}

impl TelnetCodec {
    pub fn new(max_buffer: usize) -> Self {
        TelnetCodec {
            max_buffer,
        }
    }

    /// Decode everything complete in `src` and return just the data bytes.
    /// An unfinished IAC sequence stays in `src`.
    pub fn data_only(&mut self, src: &mut BytesMut) -> io::Result<BytesMut> {
        let mut out = BytesMut::new();
        while let Some(event) = self.decode(src)? {
            if let TelnetEvent::Data(data) = event {
                out.extend_from_slice(&data);
            }
        }
        Ok(out)
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetEvent;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] != codes::IAC {
            let end = src.iter().position(|b| *b == codes::IAC).unwrap_or(src.len());
            return Ok(Some(TelnetEvent::Data(src.split_to(end).freeze())));
        }

        if src.len() < 2 {
            return Ok(None);
        }

        match src[1] {
            codes::IAC => {
                src.advance(2);
                Ok(Some(TelnetEvent::Data(Bytes::from_static(&[codes::IAC]))))
            }
            codes::WILL | codes::WONT | codes::DO | codes::DONT => {
                if src.len() < 3 {
                    return Ok(None);
                }
                let answer = TelnetEvent::Negotiate(src[1], src[2]);
                src.advance(3);
                Ok(Some(answer))
            }
            codes::SB => {
                let end = if src.len() > 3 {
                    src[3..].windows(2).position(|w| w[0] == codes::IAC && w[1] == codes::SE)
                } else {
                    None
                };
                match end {
                    Some(end) => {
                        let mut sub = src.split_to(3 + end + 2);
                        let op = sub[2];
                        sub.advance(3);
                        sub.truncate(end);
                        Ok(Some(TelnetEvent::SubNegotiate(op, sub.freeze())))
                    }
                    None if src.len() > self.max_buffer => {
                        Err(io::Error::new(io::ErrorKind::InvalidData, "unterminated telnet subnegotiation"))
                    }
                    None => Ok(None),
                }
            }
            cmd => {
                src.advance(2);
                Ok(Some(TelnetEvent::Command(cmd)))
            }
        }
    }
}
