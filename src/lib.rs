//! Client-side CoinJoin mixing engine for Dash-based payment chains.
//!
//! This library implements the wallet side of the CoinJoin (PrivateSend)
//! anonymization protocol:
//!
//! - Standardize wallet funds into fixed denominations
//! - Join masternode mixing queues, backed by anti-spam collateral
//! - Drive sessions through the pool state machine (queue, entries, signing)
//! - Track completed rounds per output until the anonymity target is reached
//! - Gate mixing on automatic backups and keypool depth
//!
//! # Quick Start
//!
//! ```no_run
//! use dash_coinjoin::{CoinJoinClient, CoinJoinConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # use dash_coinjoin::test_utils::{MockRelay, MockWallet, StaticBackup, StaticMasternodeDirectory};
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoinJoinConfig::mainnet().with_target_rounds(4);
//!
//!     // Wallet, relay, masternode directory and backup subsystem are
//!     // injected; any implementation of the collaborator traits works.
//!     let wallet = Arc::new(MockWallet::new());
//!     let relay = Arc::new(MockRelay::cooperative());
//!     let directory = Arc::new(StaticMasternodeDirectory::with_nodes(3));
//!     let backup = Arc::new(StaticBackup::enabled());
//!
//!     let mut client = CoinJoinClient::new(config, wallet, relay, directory, backup)?;
//!     client.start_mixing().await?;
//!
//!     let shutdown = CancellationToken::new();
//!     client.run(shutdown).await;
//!     Ok(())
//! }
//! ```
//!
//! The engine is tick-driven: [`CoinJoinClient::tick`] advances all session
//! state machines one step and can be scheduled by a timer, an event loop,
//! or a test harness with simulated time. All relay I/O runs under bounded
//! timeouts and cancels cleanly at tick boundaries.

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod backup;
pub mod client;
pub mod collateral;
pub mod denominations;
pub mod error;
pub mod logging;
pub mod masternode;
pub mod relay;
pub mod rounds;
pub mod session;
pub mod types;
pub mod wallet;

// Re-export main types for convenience
pub use backup::BackupGuard;
pub use client::{CoinJoinClient, CoinJoinConfig};
pub use collateral::{CollateralController, CollateralTx};
pub use denominations::{Denomination, DenominationEngine, DenominationPlan, DenominationSet};
pub use error::{
    CoinJoinError, CollateralError, DenominationError, LoggingError, MixingBlocked, RelayError,
    Result, SessionError, WalletError,
};
pub use logging::{LogFileConfig, LoggingConfig, LoggingGuard, init_console_logging, init_logging};
pub use masternode::{MasternodeDirectory, MasternodeEntry, MasternodeSelector};
pub use relay::{QueueStatus, QueueTicket, RelayClient, SessionEntry, SigningRequest};
pub use rounds::RoundTracker;
pub use session::{Session, SessionManager};
pub use tracing::level_filters::LevelFilter;
pub use types::{MixingInput, MixingStatus, PoolState, SessionId};
pub use wallet::{BackupProvider, WalletStore, WalletUtxo};

// Re-export commonly used dashcore types
pub use dashcore::{Amount, Network, OutPoint, ScriptBuf, Transaction, Txid};

/// Current version of the dash-coinjoin library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
