use std::io;

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;

/// Logical capacity of every peer buffer.
pub const PEER_CAPACITY: usize = 8192;

/// Upper bound for a single write call, so one busy client can't hog a tick.
pub const MAX_WRITE_CHUNK: usize = 2048;

/// The non-blocking half of a socket that the buffers need.
///
/// `try_read`/`try_write` must return `WouldBlock` instead of waiting.
pub trait TryIo {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl TryIo for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Read(usize),
    // Orderly shutdown by the remote end.
    Closed,
    // Nothing to read right now.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    Complete(usize),
    Partial(usize),
}

impl Drain {
    pub fn written(&self) -> usize {
        match self {
            Drain::Complete(n) | Drain::Partial(n) => *n,
        }
    }
}

/// Free space left in `buf` before it hits `PEER_CAPACITY`.
pub fn free_space(buf: &BytesMut) -> usize {
    PEER_CAPACITY.saturating_sub(buf.len())
}

/// One non-blocking read appended after the bytes already in `buf`.
///
/// At most `limit` bytes are read. Callers size `limit` from `free_space`, so the
/// buffer never grows past `PEER_CAPACITY`. Any error other than `WouldBlock`
/// is returned as-is and is fatal for the connection.
pub fn fill<S: TryIo>(socket: &S, buf: &mut BytesMut, limit: usize) -> io::Result<Fill> {
    debug_assert!(buf.len() + limit <= PEER_CAPACITY, "peer buffer overflow");
    if limit == 0 {
        return Ok(Fill::Empty);
    }

    let start = buf.len();
    buf.resize(start + limit, 0);
    let result = socket.try_read(&mut buf[start..]);
    match result {
        Ok(0) => {
            buf.truncate(start);
            Ok(Fill::Closed)
        }
        Ok(n) => {
            buf.truncate(start + n);
            Ok(Fill::Read(n))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            buf.truncate(start);
            Ok(Fill::Empty)
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
            buf.truncate(start);
            Ok(Fill::Empty)
        }
        Err(e) => {
            buf.truncate(start);
            Err(e)
        }
    }
}

/// Write out as much of `buf` as the socket takes right now.
///
/// Written bytes are removed from the front of `buf`; whatever the socket
/// refused stays queued, in order, for the next call.
pub fn drain<S: TryIo>(socket: &S, buf: &mut BytesMut) -> io::Result<Drain> {
    let mut written = 0;

    while !buf.is_empty() {
        let chunk = buf.len().min(MAX_WRITE_CHUNK);
        match socket.try_write(&buf[..chunk]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf.advance(n);
                written += n;
                if n < chunk {
                    return Ok(Drain::Partial(written));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(Drain::Partial(written));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(Drain::Complete(written))
}
