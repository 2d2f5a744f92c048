//! CoinJoin client: configuration and the mixing coordinator.

mod config;
mod core;

pub use config::CoinJoinConfig;
pub use core::CoinJoinClient;
