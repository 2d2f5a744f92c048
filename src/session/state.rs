//! One mixing session and its state transitions.

use std::time::Instant;

use dashcore::{ScriptBuf, Txid};

use crate::collateral::CollateralTx;
use crate::denominations::Denomination;
use crate::relay::QueueTicket;
use crate::types::{MixingInput, PoolState, SessionId};

/// Whether the pool state machine permits moving from `from` to `to`.
///
/// Forward progress only, plus failure from any non-terminal state. The
/// terminal states accept nothing.
pub(crate) fn can_transition(from: PoolState, to: PoolState) -> bool {
    use PoolState::*;
    match (from, to) {
        (Idle, CollateralPending) => true,
        (CollateralPending, Queued) => true,
        (Queued, EntriesCollecting) => true,
        (EntriesCollecting, Signing) => true,
        (Signing, Complete) => true,
        (from, Failed) => !from.is_terminal(),
        _ => false,
    }
}

/// One active cooperative-transaction round for a single denomination.
///
/// Created by the session manager, driven through [`PoolState`] by ticks, and
/// reaped once terminal. Inputs stay locked in the wallet for the whole
/// lifetime of the session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Identifier unique within the owning manager.
    pub id: SessionId,

    /// Denomination this session mixes.
    pub denomination: Denomination,

    /// Current pool state.
    pub state: PoolState,

    /// When the current state was entered.
    pub state_since: Instant,

    /// Locked wallet inputs participating in this session.
    pub inputs: Vec<MixingInput>,

    /// Fresh keypool scripts receiving the mixed outputs, parallel to
    /// `inputs`. Populated when the entry is submitted.
    pub outputs: Vec<ScriptBuf>,

    /// Collateral backing this session, created on the first tick.
    pub collateral: Option<CollateralTx>,

    /// Queue membership, present from `Queued` onward.
    pub ticket: Option<QueueTicket>,

    /// Masternode coordinating this session.
    pub masternode: Option<Txid>,

    /// Transient-failure retries consumed so far.
    pub retries: u32,

    /// Do not drive this session again before this instant (backoff).
    pub retry_at: Option<Instant>,

    /// Latest human-readable status or error for this session.
    pub last_message: String,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        denomination: Denomination,
        inputs: Vec<MixingInput>,
        now: Instant,
    ) -> Self {
        Session {
            id,
            denomination,
            state: PoolState::Idle,
            state_since: now,
            inputs,
            outputs: Vec::new(),
            collateral: None,
            ticket: None,
            masternode: None,
            retries: 0,
            retry_at: None,
            last_message: String::new(),
        }
    }

    /// Move to `to`, resetting the state clock. Illegal transitions are a
    /// programming error.
    pub(crate) fn advance(&mut self, to: PoolState, now: Instant) {
        debug_assert!(
            can_transition(self.state, to),
            "illegal pool transition {} -> {}",
            self.state,
            to
        );
        self.state = to;
        self.state_since = now;
        self.retry_at = None;
    }

    /// Force the session into `Failed` with a message. No-op when already
    /// terminal, so completed sessions cannot be demoted.
    pub(crate) fn fail(&mut self, message: impl Into<String>, now: Instant) {
        if self.state.is_terminal() {
            return;
        }
        self.last_message = message.into();
        self.advance(PoolState::Failed, now);
    }

    /// How long the session has sat in its current state.
    pub fn time_in_state(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.state_since)
    }

    /// Whether the session reached `Complete` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
