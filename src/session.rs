use std::{
    io,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use bytes::BytesMut;
use tokio::{
    io::{Interest, Ready},
    net::{lookup_host, TcpStream},
    sync::mpsc::Sender,
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::Destination,
    error::CloseReason,
    gateway::Shared,
    menu::{self, Choice},
    msg::Msg2Gateway,
    net::{
        buffer::{self, free_space, Drain, Fill},
        Node, Side, PEER_CAPACITY,
    },
    protocols::{
        detect::{self, Detection},
        telnet::TelnetCodec,
        websocket::{handshake, Hybi00Codec, HandshakeError},
        ConnectionType,
    },
};

/// Clients that haven't spoken by then are treated as Telnet.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a closing connection may take to deliver its last message.
pub const CLOSE_LINGER: Duration = Duration::from_secs(2);

// Largest telnet subnegotiation we'll hold onto while in the menu.
const MENU_TELNET_LIMIT: usize = PEER_CAPACITY / 2;

enum Event {
    Ready(Side, io::Result<Ready>),
    DetectionTimeout,
    // Neither socket can make progress.
    Stalled,
}

/// Drives one Connection from acceptance to close.
///
/// Each pass through the loop is one tick: wait for either socket (or the
/// detection deadline), then error check, read path, write path.
pub struct Session {
    conn_id: usize,
    node: Box<Node>,
    shared: Arc<Shared>,
    telnet: TelnetCodec,
    websocket: Hybi00Codec,
    tx_gateway: Sender<Msg2Gateway>,
}

impl Session {
    pub fn new(conn_id: usize, node: Box<Node>, shared: Arc<Shared>, tx_gateway: Sender<Msg2Gateway>) -> Self {
        Self {
            conn_id,
            node,
            shared,
            telnet: TelnetCodec::new(MENU_TELNET_LIMIT),
            websocket: Hybi00Codec::new(),
            tx_gateway,
        }
    }

    pub async fn run(mut self) {
        let reason = loop {
            if let Err(reason) = self.tick().await {
                break reason;
            }
        };

        if reason.is_orderly() {
            info!("Disconnecting client {}/{}: {}", self.node.host, self.conn_id, reason);
        } else {
            warn!("Disconnecting client {}/{}: {}", self.node.host, self.conn_id, reason);
        }

        let _ = self.tx_gateway.send(Msg2Gateway::Released(self.conn_id, self.node)).await;
    }

    async fn tick(&mut self) -> Result<(), CloseReason> {
        match self.wait().await {
            Event::DetectionTimeout => self.assume_telnet().await?,
            Event::Stalled => return Err(CloseReason::Overflow(Side::Downstream)),
            Event::Ready(side, ready) => {
                let ready = ready.map_err(CloseReason::io(side))?;
                if ready.is_error() {
                    return Err(CloseReason::Exception(side));
                }
                if ready.is_readable() || ready.is_read_closed() {
                    match side {
                        Side::Upstream => self.on_server_data().await?,
                        Side::Downstream => self.on_client_data().await?,
                    }
                }
            }
        }
        self.flush()
    }

    async fn wait(&self) -> Event {
        let node: &Node = &self.node;
        let deadline = match node.accepted_at {
            Some(at) => Instant::from_std(at) + DETECT_TIMEOUT,
            None => Instant::now(),
        };
        let detecting = node.kind == ConnectionType::Unknown;
        let down = interest(node, Side::Downstream);
        let up = interest(node, Side::Upstream).filter(|_| node.upstream.socket.is_some());
        if down.is_none() && up.is_none() && !detecting {
            return Event::Stalled;
        }

        tokio::select! {
            r = ready_on(node.downstream.socket.as_ref(), down) => Event::Ready(Side::Downstream, r),
            r = ready_on(node.upstream.socket.as_ref(), up) => Event::Ready(Side::Upstream, r),
            _ = time::sleep_until(deadline), if detecting => Event::DetectionTimeout,
        }
    }

    // Game -> client.
    async fn on_server_data(&mut self) -> Result<(), CloseReason> {
        let limit = server_read_limit(&self.node);
        let Node { downstream, upstream, kind, .. } = &mut *self.node;
        let socket = match upstream.socket.as_ref() {
            Some(socket) => socket,
            None => return Ok(()),
        };

        let staging = match kind {
            ConnectionType::WebSocket => &mut downstream.prebuf,
            _ => &mut downstream.buffer,
        };
        let result = buffer::fill(socket, staging, limit);

        match received(&self.shared, Side::Upstream, result) {
            Err(CloseReason::PeerClosed(side)) => {
                // Let the client see the game's parting words.
                self.linger().await;
                Err(CloseReason::PeerClosed(side))
            }
            Err(e) => Err(e),
            Ok(_) => {
                if *kind == ConnectionType::WebSocket && !downstream.prebuf.is_empty() {
                    let raw = downstream.prebuf.split();
                    kind.frame_into(&raw, &mut downstream.buffer);
                }
                Ok(())
            }
        }
    }

    // Client -> game, or client -> detection/menu before routing.
    async fn on_client_data(&mut self) -> Result<(), CloseReason> {
        if self.node.in_menu {
            return self.read_menu_choice().await;
        }

        let limit = client_read_limit(&self.node);
        let Node { downstream, upstream, kind, .. } = &mut *self.node;
        let socket = match downstream.socket.as_ref() {
            Some(socket) => socket,
            None => return Ok(()),
        };

        match kind {
            ConnectionType::Telnet => {
                let result = buffer::fill(socket, &mut upstream.buffer, limit);
                received(&self.shared, Side::Downstream, result)?;
                Ok(())
            }
            ConnectionType::WebSocket => {
                let result = buffer::fill(socket, &mut upstream.prebuf, limit);
                received(&self.shared, Side::Downstream, result)?;
                self.websocket
                    .decode_all(&mut upstream.prebuf, &mut upstream.buffer)
                    .map_err(CloseReason::Frame)?;
                if upstream.prebuf.len() >= PEER_CAPACITY {
                    return Err(CloseReason::Overflow(Side::Downstream));
                }
                Ok(())
            }
            ConnectionType::Unknown => {
                let result = buffer::fill(socket, &mut upstream.prebuf, limit);
                received(&self.shared, Side::Downstream, result)?;
                self.determine_connection_type().await
            }
        }
    }

    async fn determine_connection_type(&mut self) -> Result<(), CloseReason> {
        match detect::detect(&self.node.upstream.prebuf) {
            Detection::NeedMore => Ok(()),
            Detection::Handshake => self.start_websocket().await,
            Detection::HeadersTooLarge => Err(CloseReason::HeadersTooLarge),
            Detection::Unknown => Err(CloseReason::UnknownType),
            Detection::PolicyRequest => {
                debug!("Client {}/{} asked for the policy file", self.node.host, self.conn_id);
                let doc = detect::policy_document(self.shared.listen_port);
                self.node.upstream.prebuf.clear();
                self.node.downstream.buffer.extend_from_slice(doc.as_bytes());
                self.linger().await;
                Err(CloseReason::PolicyServed)
            }
        }
    }

    async fn start_websocket(&mut self) -> Result<(), CloseReason> {
        let handshake = match handshake::parse(&self.node.upstream.prebuf) {
            Ok(handshake) => handshake,
            Err(HandshakeError::Incomplete) => return Ok(()),
            Err(e) => {
                debug!(
                    "Rejected handshake from {}/{}:\n{}",
                    self.node.host,
                    self.conn_id,
                    String::from_utf8_lossy(&self.node.upstream.prebuf)
                );
                return Err(e.into());
            }
        };

        let node = &mut self.node;
        node.upstream.prebuf.clear();
        node.upstream.buffer.clear();
        node.downstream.prebuf.clear();
        node.downstream.buffer.clear();
        node.downstream.buffer.extend_from_slice(&handshake.response());
        node.kind = ConnectionType::WebSocket;

        info!("Client {}/{} started WebSocket connection.", node.host, self.conn_id);
        self.enter_menu().await
    }

    async fn assume_telnet(&mut self) -> Result<(), CloseReason> {
        debug!("Client {}/{} is quiet, assuming telnet", self.node.host, self.conn_id);
        self.node.kind = ConnectionType::Telnet;
        self.node.upstream.prebuf.clear();
        self.enter_menu().await
    }

    async fn enter_menu(&mut self) -> Result<(), CloseReason> {
        if self.shared.directory.is_empty() {
            let fallback = self.shared.fallback.clone();
            return self.connect(fallback).await;
        }

        self.node.in_menu = true;
        let banner = menu::banner(&self.shared.directory);
        queue_client(&mut self.node, &banner)
    }

    async fn read_menu_choice(&mut self) -> Result<(), CloseReason> {
        let limit = client_read_limit(&self.node);
        let line = {
            let Node { downstream, upstream, kind, .. } = &mut *self.node;
            let socket = match downstream.socket.as_ref() {
                Some(socket) => socket,
                None => return Ok(()),
            };
            let result = buffer::fill(socket, &mut upstream.prebuf, limit);
            received(&self.shared, Side::Downstream, result)?;

            match kind {
                ConnectionType::WebSocket => {
                    self.websocket
                        .decode_all(&mut upstream.prebuf, &mut upstream.buffer)
                        .map_err(CloseReason::Frame)?;
                    if upstream.prebuf.len() >= PEER_CAPACITY {
                        return Err(CloseReason::Overflow(Side::Downstream));
                    }
                    if upstream.buffer.is_empty() {
                        None
                    } else {
                        Some(upstream.buffer.split())
                    }
                }
                _ => {
                    let data = self
                        .telnet
                        .data_only(&mut upstream.prebuf)
                        .map_err(CloseReason::Frame)?;
                    upstream.buffer.extend_from_slice(&data);
                    menu::take_line(&mut upstream.buffer, upstream.prebuf.len())
                }
            }
        };

        match line {
            Some(line) => self.handle_choice(line).await,
            None => Ok(()),
        }
    }

    async fn handle_choice(&mut self, line: BytesMut) -> Result<(), CloseReason> {
        match menu::parse_choice(&line, self.shared.directory.len()) {
            Choice::Quit => Err(CloseReason::Quit),
            Choice::Invalid => queue_client(&mut self.node, menu::PROMPT.as_bytes()),
            Choice::Select(n) => {
                let dest = match self.shared.directory.get(n) {
                    Some(dest) => dest.clone(),
                    None => return queue_client(&mut self.node, menu::PROMPT.as_bytes()),
                };
                self.connect(dest).await
            }
        }
    }

    async fn connect(&mut self, dest: Destination) -> Result<(), CloseReason> {
        info!(
            "Client {}/{} connecting to {} ({}:{})",
            self.node.host, self.conn_id, dest.name, dest.host, dest.port
        );

        let addr = match lookup_host((dest.host.as_str(), dest.port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                debug!("Lookup of {} failed: {}", dest.host, e);
                None
            }
        };
        let addr = match addr {
            Some(addr) => addr,
            None => return self.refuse(&dest, "Wrong host.\r\n", "host not found").await,
        };

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => return self.refuse(&dest, "Could not connect to game.\r\n", &e.to_string()).await,
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY towards {}: {}", dest.host, e);
        }

        let node = &mut self.node;
        node.upstream.socket = Some(stream);
        node.in_menu = false;
        node.upstream.buffer.clear();
        if node.kind == ConnectionType::Telnet {
            // Anything typed after the choice belongs to the game.
            let rest = node.upstream.prebuf.split();
            node.upstream.buffer.extend_from_slice(&rest);
        }
        Ok(())
    }

    async fn refuse(&mut self, dest: &Destination, message: &str, detail: &str) -> Result<(), CloseReason> {
        queue_client(&mut self.node, message.as_bytes())?;
        self.linger().await;
        Err(CloseReason::Destination {
            target: format!("{}:{}", dest.host, dest.port),
            detail: detail.to_string(),
        })
    }

    // Write path: push whatever is queued for either socket.
    fn flush(&mut self) -> Result<(), CloseReason> {
        for side in [Side::Upstream, Side::Downstream] {
            let peer = match side {
                Side::Upstream => &mut self.node.upstream,
                Side::Downstream => &mut self.node.downstream,
            };
            let socket = match peer.socket.as_ref() {
                Some(socket) if !peer.buffer.is_empty() => socket,
                _ => continue,
            };
            let drained = buffer::drain(socket, &mut peer.buffer).map_err(CloseReason::io(side))?;
            self.shared.bytes_sent.fetch_add(drained.written() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Best-effort delivery of the client's queued output before a close.
    async fn linger(&mut self) {
        let conn_id = self.conn_id;
        let flushed = time::timeout(CLOSE_LINGER, async {
            let peer = &mut self.node.downstream;
            let socket = match peer.socket.as_ref() {
                Some(socket) => socket,
                None => return,
            };
            while !peer.buffer.is_empty() {
                match buffer::drain(socket, &mut peer.buffer) {
                    Ok(drained) => {
                        self.shared.bytes_sent.fetch_add(drained.written() as u64, Ordering::Relaxed);
                        if let Drain::Complete(_) = drained {
                            return;
                        }
                    }
                    Err(_) => return,
                }
                if socket.writable().await.is_err() {
                    return;
                }
            }
        })
        .await;

        if flushed.is_err() {
            debug!("Gave up flushing output to {}", conn_id);
        }
    }
}

async fn ready_on(socket: Option<&TcpStream>, interest: Option<Interest>) -> io::Result<Ready> {
    match (socket, interest) {
        (Some(socket), Some(interest)) => socket.ready(interest).await,
        _ => std::future::pending().await,
    }
}

fn received(shared: &Shared, side: Side, result: io::Result<Fill>) -> Result<usize, CloseReason> {
    match result.map_err(CloseReason::io(side))? {
        Fill::Read(n) => {
            shared.bytes_recv.fetch_add(n as u64, Ordering::Relaxed);
            Ok(n)
        }
        Fill::Empty => Ok(0),
        Fill::Closed => Err(CloseReason::PeerClosed(side)),
    }
}

/// Queue `payload` for the client in its current framing.
fn queue_client(node: &mut Node, payload: &[u8]) -> Result<(), CloseReason> {
    if node.kind.framed_len(payload) > free_space(&node.downstream.buffer) {
        return Err(CloseReason::Overflow(Side::Downstream));
    }
    node.kind.frame_into(payload, &mut node.downstream.buffer);
    Ok(())
}

/// What to wait for on one socket, or `None` when it has nothing to do.
/// Error readiness is always included so the exception check can see it.
pub fn interest<S>(node: &Node<S>, side: Side) -> Option<Interest> {
    let room = match side {
        Side::Downstream => client_read_limit(node),
        Side::Upstream => server_read_limit(node),
    };
    let mut interest = if room > 0 { Some(Interest::READABLE) } else { None };
    if node.peer(side).has_output() {
        interest = Some(interest.map_or(Interest::WRITABLE, |i| i.add(Interest::WRITABLE)));
    }
    interest.map(|i| i.add(Interest::ERROR))
}

/// How much may be read from the client this tick without overrunning the
/// buffers that input passes through.
pub fn client_read_limit<S>(node: &Node<S>) -> usize {
    let up = &node.upstream;
    match node.kind {
        ConnectionType::Telnet if !node.in_menu => free_space(&up.buffer),
        ConnectionType::Unknown => free_space(&up.prebuf),
        // Translated input is never longer than its wire form.
        _ => free_space(&up.prebuf).min(free_space(&up.buffer).saturating_sub(up.prebuf.len())),
    }
}

/// How much may be read from the game this tick. WebSocket output can double
/// in size and gains two framing bytes.
pub fn server_read_limit<S>(node: &Node<S>) -> usize {
    if node.is_routing() {
        return 0;
    }
    let down = &node.downstream;
    match node.kind {
        ConnectionType::WebSocket => (free_space(&down.buffer).saturating_sub(2) / 2).min(free_space(&down.prebuf)),
        _ => free_space(&down.buffer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_limits_follow_buffer_space() {
        let mut node: Node<u8> = Node::new();
        assert_eq!(client_read_limit(&node), PEER_CAPACITY);
        assert_eq!(server_read_limit(&node), 0);

        node.kind = ConnectionType::Telnet;
        node.upstream.socket = Some(1);
        node.upstream.buffer.extend_from_slice(&[b'x'; 100]);
        assert_eq!(client_read_limit(&node), PEER_CAPACITY - 100);
        node.downstream.buffer.extend_from_slice(&[b'y'; PEER_CAPACITY]);
        assert_eq!(server_read_limit(&node), 0);
    }

    #[test]
    fn websocket_output_leaves_room_for_expansion() {
        let mut node: Node<u8> = Node::new();
        node.kind = ConnectionType::WebSocket;
        node.upstream.socket = Some(1);
        assert_eq!(server_read_limit(&node), (PEER_CAPACITY - 2) / 2);

        // Worst case: every byte is high and needs two bytes.
        let raw = vec![0xFFu8; server_read_limit(&node)];
        assert!(Hybi00Codec::framed_len(&raw) <= PEER_CAPACITY);
    }

    #[test]
    fn interest_always_watches_for_errors() {
        let mut node: Node<u8> = Node::new();
        node.downstream.socket = Some(1);
        let down = interest(&node, Side::Downstream).unwrap();
        assert!(down.is_readable());
        assert!(down.is_error());
        assert!(!down.is_writable());
        assert_eq!(interest(&node, Side::Upstream), None);

        node.downstream.buffer.extend_from_slice(b"banner");
        let down = interest(&node, Side::Downstream).unwrap();
        assert!(down.is_writable() && down.is_error());
    }

    #[test]
    fn full_relay_buffer_still_leaves_something_to_wait_on() {
        let mut node: Node<u8> = Node::new();
        node.kind = ConnectionType::Telnet;
        node.downstream.socket = Some(1);
        node.upstream.socket = Some(2);
        node.upstream.buffer.extend_from_slice(&[b'x'; PEER_CAPACITY]);
        assert_eq!(interest(&node, Side::Downstream), None);
        assert!(interest(&node, Side::Upstream).unwrap().is_writable());
    }

    #[test]
    fn menu_input_is_bounded_by_staged_bytes() {
        let mut node: Node<u8> = Node::new();
        node.kind = ConnectionType::WebSocket;
        node.in_menu = true;
        node.upstream.prebuf.extend_from_slice(&[0x00, b'a']);
        node.upstream.buffer.extend_from_slice(&[b'1'; 10]);
        assert_eq!(client_read_limit(&node), PEER_CAPACITY - 12);
    }
}
