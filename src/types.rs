//! Common type definitions for the CoinJoin mixing engine.

use std::fmt;
use std::time::SystemTime;

use dashcore::{Amount, OutPoint, ScriptBuf, TxOut};
use serde::{Deserialize, Serialize};

use crate::denominations::Denomination;

/// Outputs at or below this many duffs are considered dust.
pub const DUST_LIMIT: u64 = 546;

/// Lower bound of an acceptable collateral value in duffs (0.001 coin).
pub const COLLATERAL_LOWER: u64 = 100_000;

/// Upper bound of an acceptable collateral value (4x the lower bound).
pub const COLLATERAL_UPPER: u64 = 4 * COLLATERAL_LOWER;

/// Identifier of one mixing session, unique within a client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// A wallet UTXO as seen by the mixing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixingInput {
    /// The outpoint (transaction hash + output index).
    pub outpoint: OutPoint,

    /// The output containing value and script.
    pub txout: TxOut,

    /// Exact denomination classification, or `None` for non-denominated value.
    pub denomination: Option<Denomination>,

    /// Completed mixing rounds for this output's script.
    pub rounds: u32,

    /// Whether the creating transaction is confirmed.
    pub confirmed: bool,
}

impl MixingInput {
    /// Value of the underlying output.
    pub fn value(&self) -> Amount {
        Amount::from_sat(self.txout.value)
    }

    /// Script of the underlying output.
    pub fn script(&self) -> &ScriptBuf {
        &self.txout.script_pubkey
    }

    /// Whether this input carries an exact denomination value.
    pub fn is_denominated(&self) -> bool {
        self.denomination.is_some()
    }
}

/// State of one mixing session.
///
/// `Complete` and `Failed` are terminal; the session manager reaps terminal
/// sessions on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolState {
    /// Session created, nothing submitted yet.
    Idle,
    /// Collateral transaction created, awaiting acceptance.
    CollateralPending,
    /// Joined a masternode queue, waiting for enough participants.
    Queued,
    /// Session formed; our inputs and outputs submitted to the relay.
    EntriesCollecting,
    /// Signing request received and our signatures submitted.
    Signing,
    /// Joint transaction fully signed and broadcast.
    Complete,
    /// Timed out, aborted, or rejected by the relay.
    Failed,
}

impl PoolState {
    /// Whether the session has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, PoolState::Complete | PoolState::Failed)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::Idle => "idle",
            PoolState::CollateralPending => "collateral pending",
            PoolState::Queued => "queued",
            PoolState::EntriesCollecting => "collecting entries",
            PoolState::Signing => "signing",
            PoolState::Complete => "complete",
            PoolState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of mixing progress, polled by status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingStatus {
    /// Whether mixing is currently enabled.
    pub running: bool,

    /// Number of non-terminal sessions.
    pub active_sessions: usize,

    /// Progress toward the keep-anonymized target, 0.0 to 100.0.
    pub progress: f64,

    /// Human-readable description of the latest state change or error.
    pub last_message: String,

    /// Unused keys left in the wallet keypool.
    pub keys_left: u32,

    /// Total value of denominated outputs, in duffs.
    pub denominated_balance: u64,

    /// Total value of denominated outputs that reached the round target,
    /// in duffs.
    pub anonymized_balance: u64,

    /// Time of the last status update.
    pub updated_at: SystemTime,
}

impl Default for MixingStatus {
    fn default() -> Self {
        MixingStatus {
            running: false,
            active_sessions: 0,
            progress: 0.0,
            last_message: String::new(),
            keys_left: 0,
            denominated_balance: 0,
            anonymized_balance: 0,
            updated_at: SystemTime::now(),
        }
    }
}
