//! Configuration for the CoinJoin client.

use std::path::PathBuf;
use std::time::Duration;

use dashcore::{Amount, Network};

use crate::denominations::{COIN, DenominationSet};
use crate::error::{CoinJoinError, Result};

/// Default number of rounds each output is mixed through.
pub const DEFAULT_ROUNDS: u32 = 4;

/// Default target of anonymized value to keep, in duffs.
pub const DEFAULT_KEEP_AMOUNT: u64 = 1000 * COIN;

/// Configuration for the CoinJoin client.
///
/// The denomination set is validated at construction and immutable
/// afterwards; there is no way to patch it at runtime.
#[derive(Debug, Clone)]
pub struct CoinJoinConfig {
    /// Network to mix on.
    pub network: Network,

    /// Fixed denomination set, largest first.
    pub denominations: DenominationSet,

    /// Rounds each output must complete to count as anonymized (2-16).
    pub target_rounds: u32,

    /// Value of anonymized funds to maintain.
    pub keep_amount: Amount,

    /// Upper bound on concurrently active sessions. The default of 1 is the
    /// single-session mode; raising it enables multi-session mixing.
    pub max_sessions: usize,

    /// Maximum inputs submitted per session entry.
    pub max_inputs_per_session: usize,

    /// Timeout for a session to leave any non-signing state.
    pub session_timeout: Duration,

    /// Timeout for the signing exchange.
    pub signing_timeout: Duration,

    /// Upper bound on any single relay call.
    pub relay_call_timeout: Duration,

    /// Backoff applied before retrying after a transient relay error.
    pub retry_delay: Duration,

    /// Transient-failure retries per session before giving up.
    pub max_retries: u32,

    /// Where round counters are persisted. `None` keeps them in memory only.
    pub rounds_state_path: Option<PathBuf>,
}

impl Default for CoinJoinConfig {
    fn default() -> Self {
        CoinJoinConfig {
            network: Network::Dash,
            denominations: DenominationSet::standard(),
            target_rounds: DEFAULT_ROUNDS,
            keep_amount: Amount::from_sat(DEFAULT_KEEP_AMOUNT),
            max_sessions: 1,
            max_inputs_per_session: 9,
            session_timeout: Duration::from_secs(40),
            signing_timeout: Duration::from_secs(15),
            relay_call_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(5),
            max_retries: 5,
            rounds_state_path: None,
        }
    }
}

impl CoinJoinConfig {
    /// Create a configuration for the given network.
    pub fn new(network: Network) -> Self {
        CoinJoinConfig {
            network,
            ..Self::default()
        }
    }

    /// Create a configuration for mainnet.
    pub fn mainnet() -> Self {
        Self::new(Network::Dash)
    }

    /// Create a configuration for testnet.
    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Create a configuration for regtest.
    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    /// Set the denomination set.
    pub fn with_denominations(mut self, denominations: DenominationSet) -> Self {
        self.denominations = denominations;
        self
    }

    /// Set the round target.
    pub fn with_target_rounds(mut self, rounds: u32) -> Self {
        self.target_rounds = rounds;
        self
    }

    /// Set the keep-anonymized amount.
    pub fn with_keep_amount(mut self, amount: Amount) -> Self {
        self.keep_amount = amount;
        self
    }

    /// Set the concurrent session bound (multi-session mode when above 1).
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Set the non-signing session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the round-counter persistence path.
    pub fn with_rounds_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rounds_state_path = Some(path.into());
        self
    }

    /// Validate bounds that the type system cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if !(2..=16).contains(&self.target_rounds) {
            return Err(CoinJoinError::Config(format!(
                "target_rounds must be within 2-16, got {}",
                self.target_rounds
            )));
        }
        if self.max_sessions == 0 {
            return Err(CoinJoinError::Config("max_sessions must be at least 1".to_string()));
        }
        if self.max_inputs_per_session == 0 {
            return Err(CoinJoinError::Config(
                "max_inputs_per_session must be at least 1".to_string(),
            ));
        }
        if self.keep_amount.to_sat() < self.denominations.smallest().to_duffs() {
            return Err(CoinJoinError::Config(format!(
                "keep_amount {} is below the smallest denomination {}",
                self.keep_amount,
                self.denominations.smallest()
            )));
        }
        Ok(())
    }
}
