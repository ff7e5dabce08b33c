use std::net::SocketAddr;

use crate::net::Node;

#[derive(Debug)]
pub enum Msg2Gateway {
    // A session finished; its node goes back to the pool.
    Released(usize, Box<Node>),
    // Stop accepting and end every session.
    Kill,
}

// What the gateway keeps about a live session.
#[derive(Debug)]
pub struct SessionLink {
    pub conn_id: usize,
    pub addr: SocketAddr,
    pub host: String,
    pub handle: tokio::task::JoinHandle<()>,
}
