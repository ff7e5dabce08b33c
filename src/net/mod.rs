pub mod buffer;
pub mod node;
pub mod pool;

pub use buffer::{Drain, Fill, TryIo, MAX_WRITE_CHUNK, PEER_CAPACITY};
pub use node::{Node, Peer, Side};
pub use pool::NodePool;
