use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocols::websocket::Hybi00Codec;

pub mod detect;
pub mod telnet;
pub mod websocket;

/// What a downstream client turned out to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    Unknown,
    Telnet,
    WebSocket,
}

impl ConnectionType {
    /// Wire size of `payload` once framed for this connection type.
    pub fn framed_len(&self, payload: &[u8]) -> usize {
        match self {
            ConnectionType::WebSocket => Hybi00Codec::framed_len(payload),
            _ => payload.len(),
        }
    }

    /// Queue `payload` into `dst` in this connection's framing.
    pub fn frame_into(&self, payload: &[u8], dst: &mut BytesMut) {
        match self {
            ConnectionType::WebSocket => {
                // Encoding into a BytesMut can't fail.
                let _ = Hybi00Codec::new().encode(payload, dst);
            }
            _ => dst.put_slice(payload),
        }
    }
}
