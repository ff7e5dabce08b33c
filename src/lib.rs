pub mod config;
pub mod error;
pub mod gateway;
pub mod menu;
pub mod msg;
pub mod net;
pub mod protocols;
pub mod session;
pub mod util;

pub use config::GatewayConfig;
pub use gateway::{Gateway, Totals};
