pub mod codec;
pub mod handshake;
pub mod transcode;

pub use codec::Hybi00Codec;
pub use handshake::{ClientHandshake, HandshakeError};
