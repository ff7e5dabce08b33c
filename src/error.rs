use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::Side;
use crate::protocols::websocket::HandshakeError;

/// Failures that stop the gateway from starting.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: io::Error,
    },
    #[error("could not start the runtime: {0}")]
    Runtime(io::Error),
}

/// Why a session ended. Only ever affects that one connection.
#[derive(Debug, Error)]
pub enum CloseReason {
    #[error("{0} closed the connection")]
    PeerClosed(Side),
    #[error("{side} socket error: {source}")]
    Io { side: Side, source: io::Error },
    #[error("{0} socket reported an error condition")]
    Exception(Side),
    #[error("bad WebSocket handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("undecodable WebSocket frame: {0}")]
    Frame(io::Error),
    #[error("headers too large")]
    HeadersTooLarge,
    #[error("could not determine connection type")]
    UnknownType,
    #[error("served Flash policy file")]
    PolicyServed,
    #[error("quit from the menu")]
    Quit,
    #[error("could not reach {target}: {detail}")]
    Destination { target: String, detail: String },
    #[error("{0} buffer overflow")]
    Overflow(Side),
}

impl CloseReason {
    pub fn io(side: Side) -> impl FnOnce(io::Error) -> CloseReason {
        move |source| CloseReason::Io { side, source }
    }

    /// Endings that are part of normal operation rather than faults.
    pub fn is_orderly(&self) -> bool {
        matches!(
            self,
            CloseReason::PeerClosed(_) | CloseReason::PolicyServed | CloseReason::Quit
        )
    }
}
