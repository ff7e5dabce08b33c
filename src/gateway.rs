use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::join_all;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::mpsc::{channel, Receiver, Sender},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{Destination, Directory, GatewayConfig},
    error::GatewayError,
    msg::{Msg2Gateway, SessionLink},
    net::{Node, NodePool},
    session::Session,
    util::display_host,
};

const LISTEN_BACKLOG: u32 = 5;

/// Read-only settings and traffic counters every session can see.
#[derive(Debug)]
pub struct Shared {
    pub directory: Directory,
    pub fallback: Destination,
    /// The port actually bound, advertised in the policy file.
    pub listen_port: u16,
    pub bytes_recv: AtomicU64,
    pub bytes_sent: AtomicU64,
}

/// Lifetime statistics, reported at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub bytes_recv: u64,
    pub bytes_sent: u64,
    pub nodes_allocated: u64,
}

/// Owns the listening socket, the node pool and the registry of live sessions.
pub struct Gateway {
    pub tx_gateway: Sender<Msg2Gateway>,
    rx_gateway: Receiver<Msg2Gateway>,
    listener: TcpListener,
    config: GatewayConfig,
    shared: Arc<Shared>,
    pool: NodePool,
    sessions: BTreeMap<usize, SessionLink>,
    next_id: usize,
}

impl Gateway {
    pub async fn bind(config: GatewayConfig) -> Result<Self, GatewayError> {
        let addr = config.listen;
        let listen_err = move |source| GatewayError::Listen { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(listen_err)?;
        socket.set_reuseaddr(true).map_err(listen_err)?;
        socket.bind(addr).map_err(listen_err)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(listen_err)?;
        let listen_port = listener.local_addr().map_err(listen_err)?.port();

        let shared = Arc::new(Shared {
            directory: config.directory.clone(),
            fallback: config.fallback.clone(),
            listen_port,
            bytes_recv: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        });

        let (tx_gateway, rx_gateway) = channel(100);
        Ok(Self {
            tx_gateway,
            rx_gateway,
            listener,
            config,
            shared,
            pool: NodePool::new(),
            sessions: BTreeMap::new(),
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve clients until told to stop.
    pub async fn run(mut self) -> Totals {
        if let Ok(addr) = self.local_addr() {
            info!("Lantern listening on {}", addr);
        }
        if self.shared.directory.is_empty() {
            info!(
                "No games configured, sending everyone to {}:{}",
                self.shared.fallback.host, self.shared.fallback.port
            );
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => error!("Error accepting connection: {}", e),
                },
                msg = self.rx_gateway.recv() => match msg {
                    Some(Msg2Gateway::Released(conn_id, node)) => self.release(conn_id, node),
                    Some(Msg2Gateway::Kill) | None => break,
                }
            }
        }

        self.shutdown().await
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let host = display_host(&addr);

        if self.config.is_blocked(addr.ip()) {
            info!("Refused blacklisted client {}", host);
            return;
        }
        if self.config.max_connections > 0 && self.sessions.len() >= self.config.max_connections {
            warn!("Refused {}: {} connections already open", host, self.sessions.len());
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", host, e);
        }
        let conn_id = self.next_id;
        self.next_id += 1;

        let mut node = self.pool.acquire();
        node.attach(stream, host.clone());
        info!("Client {}/{} connected ({} open)", host, conn_id, self.sessions.len() + 1);

        let session = Session::new(conn_id, node, self.shared.clone(), self.tx_gateway.clone());
        let handle = tokio::spawn(session.run());
        self.sessions.insert(
            conn_id,
            SessionLink {
                conn_id,
                addr,
                host,
                handle,
            },
        );
    }

    fn release(&mut self, conn_id: usize, node: Box<Node>) {
        self.sessions.remove(&conn_id);
        self.pool.release(node);
        info!(
            "Connection {} finished, {} open, {} pooled",
            conn_id,
            self.sessions.len(),
            self.pool.idle()
        );
    }

    async fn shutdown(&mut self) -> Totals {
        info!("Shutting down, closing {} connections", self.sessions.len());

        let sessions = std::mem::take(&mut self.sessions);
        let handles: Vec<_> = sessions
            .into_values()
            .map(|link| {
                debug!("Closing {}/{} ({})", link.host, link.conn_id, link.addr);
                link.handle.abort();
                link.handle
            })
            .collect();
        join_all(handles).await;

        let totals = Totals {
            bytes_recv: self.shared.bytes_recv.load(Ordering::Relaxed),
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            nodes_allocated: self.pool.allocated(),
        };
        info!("Bytes received: {}", totals.bytes_recv);
        info!("Bytes sent: {}", totals.bytes_sent);
        info!("Nodes allocated: {}", totals.nodes_allocated);
        totals
    }
}
