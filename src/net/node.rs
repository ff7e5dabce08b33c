use std::time::Instant;

use bytes::BytesMut;
use tokio::net::TcpStream;

use crate::net::buffer::PEER_CAPACITY;
use crate::protocols::ConnectionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Downstream,
    Upstream,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Downstream => write!(f, "client"),
            Side::Upstream => write!(f, "game"),
        }
    }
}

/// One socket and the data queued for it.
///
/// `buffer` holds bytes ready to be written to this peer's socket. `prebuf`
/// holds bytes headed the same way but still in the other side's wire form,
/// waiting for WebSocket translation.
#[derive(Debug)]
pub struct Peer<S = TcpStream> {
    pub socket: Option<S>,
    pub buffer: BytesMut,
    pub prebuf: BytesMut,
}

impl<S> Peer<S> {
    pub fn new() -> Self {
        Self {
            socket: None,
            buffer: BytesMut::with_capacity(PEER_CAPACITY),
            prebuf: BytesMut::with_capacity(PEER_CAPACITY),
        }
    }

    pub fn has_output(&self) -> bool {
        self.socket.is_some() && !self.buffer.is_empty()
    }

    fn reset(&mut self) {
        // Dropping the socket closes it.
        self.socket = None;
        self.buffer.clear();
        self.prebuf.clear();
    }

    fn is_pristine(&self) -> bool {
        self.socket.is_none() && self.buffer.is_empty() && self.prebuf.is_empty()
    }
}

impl<S> Default for Peer<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A proxied session: the accepted client and, once a game is chosen, the
/// connection to that game.
///
/// Bytes read from `upstream`'s socket end up in `downstream`'s buffers and
/// vice versa.
#[derive(Debug)]
pub struct Node<S = TcpStream> {
    pub downstream: Peer<S>,
    pub upstream: Peer<S>,
    pub host: String,
    pub kind: ConnectionType,
    pub in_menu: bool,
    pub accepted_at: Option<Instant>,
}

impl<S> Node<S> {
    pub fn new() -> Self {
        Self {
            downstream: Peer::new(),
            upstream: Peer::new(),
            host: String::new(),
            kind: ConnectionType::Unknown,
            in_menu: false,
            accepted_at: None,
        }
    }

    /// Bind a freshly accepted client socket.
    pub fn attach(&mut self, socket: S, host: String) {
        self.downstream.socket = Some(socket);
        self.host = host;
        self.kind = ConnectionType::Unknown;
        self.in_menu = false;
        self.accepted_at = Some(Instant::now());
    }

    /// Still detecting or in the menu, no game connection yet.
    pub fn is_routing(&self) -> bool {
        self.upstream.socket.is_none()
    }

    pub fn peer(&self, side: Side) -> &Peer<S> {
        match side {
            Side::Downstream => &self.downstream,
            Side::Upstream => &self.upstream,
        }
    }

    /// Close both sockets and return every field to its initial value.
    pub fn reset(&mut self) {
        self.downstream.reset();
        self.upstream.reset();
        self.host.clear();
        self.kind = ConnectionType::Unknown;
        self.in_menu = false;
        self.accepted_at = None;
    }

    pub fn is_pristine(&self) -> bool {
        self.downstream.is_pristine()
            && self.upstream.is_pristine()
            && self.host.is_empty()
            && self.kind == ConnectionType::Unknown
            && !self.in_menu
            && self.accepted_at.is_none()
    }
}

impl<S> Default for Node<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_returns_to_initial_state() {
        let mut node: Node<u32> = Node::new();
        assert!(node.is_pristine());

        node.attach(7, "10.0.0.1".to_string());
        node.upstream.socket = Some(8);
        node.kind = ConnectionType::WebSocket;
        node.in_menu = true;
        node.downstream.buffer.extend_from_slice(b"out");
        node.upstream.prebuf.extend_from_slice(&[0x00, b'a']);
        assert!(!node.is_pristine());
        assert!(!node.is_routing());
        assert!(node.downstream.has_output());

        node.reset();
        assert!(node.is_pristine());
        assert!(node.is_routing());
    }
}
