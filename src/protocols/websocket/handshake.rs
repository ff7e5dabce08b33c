//! Opening handshake for hixie-76 / hybi-00 WebSocket clients.
//!
//! The client proves it speaks WebSocket by sending two obfuscated keys in its
//! headers plus eight raw bytes after the blank line. The server answers with
//! the MD5 of `key1 ‖ key2 ‖ key3`.

use md5::{Digest, Md5};
use thiserror::Error;

use crate::util::find_ignore_case;

pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
pub const MAX_HEADER_LEN: usize = 1024;
pub const KEY3_LEN: usize = 8;

const MAX_KEY_DIGITS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("request is still incomplete")]
    Incomplete,
    #[error("headers too large")]
    TooLarge,
    #[error("missing or malformed {0}")]
    Missing(&'static str),
    #[error("{0} has no spaces")]
    NoSpaces(&'static str),
    #[error("{0} is not a multiple of its space count")]
    NotDivisible(&'static str),
    #[error("{0} has too many digits")]
    KeyOverflow(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    pub origin: String,
    pub host: String,
    pub key1: [u8; 4],
    pub key2: [u8; 4],
    pub key3: [u8; KEY3_LEN],
}

impl ClientHandshake {
    pub fn challenge(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.key1);
        out[4..8].copy_from_slice(&self.key2);
        out[8..].copy_from_slice(&self.key3);
        out
    }

    pub fn digest(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&Md5::digest(self.challenge()));
        out
    }

    /// The complete `101` response, digest included.
    pub fn response(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
             Upgrade: WebSocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Origin: {}\r\n\
             Sec-WebSocket-Location: ws://{}/menu\r\n\
             \r\n",
            self.origin, self.host
        );
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.digest());
        out
    }
}

/// Parse a buffered upgrade request: header block, blank line, then key3.
///
/// Returns `Incomplete` while key3 hasn't fully arrived yet.
pub fn parse(request: &[u8]) -> Result<ClientHandshake, HandshakeError> {
    let terminator = match find_ignore_case(request, HEADER_TERMINATOR) {
        Some(at) => at,
        None if request.len() > MAX_HEADER_LEN => return Err(HandshakeError::TooLarge),
        None => return Err(HandshakeError::Incomplete),
    };
    let body = terminator + HEADER_TERMINATOR.len();
    if body > MAX_HEADER_LEN {
        return Err(HandshakeError::TooLarge);
    }
    if request.len() < body + KEY3_LEN {
        return Err(HandshakeError::Incomplete);
    }

    // Keep the CRLF that ends the last header so every field is "\r\n...\r\n".
    let headers = &request[..terminator + 2];

    if !request.starts_with(b"GET ") || find_ignore_case(headers, b"GET /menu HTTP/1.1\r\n").is_none() {
        return Err(HandshakeError::Missing("request line"));
    }
    if find_ignore_case(headers, b"\r\nUpgrade: WebSocket\r\n").is_none() {
        return Err(HandshakeError::Missing("Upgrade header"));
    }
    if find_ignore_case(headers, b"\r\nConnection: Upgrade\r\n").is_none() {
        return Err(HandshakeError::Missing("Connection header"));
    }

    let key1 = header_value(headers, b"\r\nSec-WebSocket-Key1: ")
        .ok_or(HandshakeError::Missing("Sec-WebSocket-Key1"))?;
    let key2 = header_value(headers, b"\r\nSec-WebSocket-Key2: ")
        .ok_or(HandshakeError::Missing("Sec-WebSocket-Key2"))?;
    let origin = header_value(headers, b"\r\nOrigin: ").ok_or(HandshakeError::Missing("Origin"))?;
    let host = header_value(headers, b"\r\nHost: ").ok_or(HandshakeError::Missing("Host"))?;

    let mut key3 = [0u8; KEY3_LEN];
    key3.copy_from_slice(&request[body..body + KEY3_LEN]);

    Ok(ClientHandshake {
        origin: String::from_utf8_lossy(origin).into_owned(),
        host: String::from_utf8_lossy(host).into_owned(),
        key1: derive_key(key1, "Sec-WebSocket-Key1")?,
        key2: derive_key(key2, "Sec-WebSocket-Key2")?,
        key3,
    })
}

/// Value of the header introduced by `name`, up to (not including) its CR.
fn header_value<'a>(headers: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let start = find_ignore_case(headers, name)? + name.len();
    let len = headers[start..].iter().position(|b| *b == b'\r')?;
    Some(&headers[start..start + len])
}

/// Digits concatenated, divided by the number of spaces, big-endian.
pub fn derive_key(value: &[u8], name: &'static str) -> Result<[u8; 4], HandshakeError> {
    let mut number: u64 = 0;
    let mut digits = 0;
    let mut spaces: u64 = 0;

    for &b in value {
        if b == b' ' {
            spaces += 1;
        } else if b.is_ascii_digit() {
            digits += 1;
            if digits > MAX_KEY_DIGITS {
                return Err(HandshakeError::KeyOverflow(name));
            }
            number = number * 10 + u64::from(b - b'0');
        }
    }

    let number = u32::try_from(number).map_err(|_| HandshakeError::KeyOverflow(name))?;
    if spaces == 0 {
        return Err(HandshakeError::NoSpaces(name));
    }
    if u64::from(number) % spaces != 0 {
        return Err(HandshakeError::NotDivisible(name));
    }
    Ok(((u64::from(number) / spaces) as u32).to_be_bytes())
}
