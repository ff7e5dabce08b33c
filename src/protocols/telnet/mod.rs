pub mod codec;
pub mod codes;

pub use codec::{TelnetCodec, TelnetEvent};
