//! Per-denomination session management.
//!
//! The manager owns every live [`Session`] and drives them through the pool
//! state machine from a periodic [`tick`](SessionManager::tick). All relay
//! I/O happens inside the tick under a bounded timeout, so the caller can
//! cancel mixing at any tick boundary.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashcore::{OutPoint, ScriptBuf, TxIn, TxOut, Witness};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::CoinJoinConfig;
use crate::collateral::CollateralController;
use crate::denominations::Denomination;
use crate::error::{RelayError, RelayResult, SessionError, SessionResult};
use crate::masternode::{MasternodeDirectory, MasternodeSelector};
use crate::relay::{RelayClient, SessionEntry, SigningRequest};
use crate::rounds::RoundTracker;
use crate::session::Session;
use crate::types::{MixingInput, PoolState, SessionId};
use crate::wallet::WalletStore;

/// Tracks one active mixing session per denomination and drives their state
/// machines.
///
/// Generic over the wallet, relay and masternode directory seams so tests
/// can run entirely against in-memory mocks, the same way `dash-spv` keeps
/// its sync managers generic over storage and network.
pub struct SessionManager<W, R, M> {
    config: CoinJoinConfig,
    wallet: Arc<W>,
    relay: Arc<R>,
    directory: Arc<M>,
    rounds: Arc<RwLock<RoundTracker>>,
    collateral: CollateralController,
    selector: MasternodeSelector,
    sessions: HashMap<Denomination, Session>,
    next_id: u64,
    last_message: String,
}

impl<W, R, M> SessionManager<W, R, M>
where
    W: WalletStore,
    R: RelayClient,
    M: MasternodeDirectory,
{
    pub fn new(
        config: CoinJoinConfig,
        wallet: Arc<W>,
        relay: Arc<R>,
        directory: Arc<M>,
        rounds: Arc<RwLock<RoundTracker>>,
    ) -> Self {
        SessionManager {
            config,
            wallet,
            relay,
            directory,
            rounds,
            collateral: CollateralController::new(),
            selector: MasternodeSelector::new(),
            sessions: HashMap::new(),
            next_id: 0,
            last_message: String::new(),
        }
    }

    /// Number of non-terminal sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.values().filter(|s| !s.is_terminal()).count()
    }

    /// Whether a live session exists for `denomination`.
    pub fn is_mixing(&self, denomination: Denomination) -> bool {
        self.sessions.get(&denomination).is_some_and(|s| !s.is_terminal())
    }

    /// Latest status or error message across all sessions.
    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    /// Snapshot of live sessions for status displays.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Start a new session for `denomination`.
    ///
    /// Checks are ordered so that no collateral is created, and no input is
    /// locked, unless a session actually starts. The collateral itself is
    /// created on the first tick (`Idle -> CollateralPending`).
    pub async fn start_session(
        &mut self,
        denomination: Denomination,
        now: Instant,
    ) -> SessionResult<SessionId> {
        if self.is_mixing(denomination) {
            return Err(SessionError::AlreadyMixing(denomination));
        }
        if self.active_sessions() >= self.config.max_sessions {
            return Err(SessionError::MaxSessionsReached(self.config.max_sessions));
        }
        if !self.directory.is_synced().await {
            return Err(SessionError::SyncInProgress);
        }
        if self
            .selector
            .select(&self.directory.entries().await, None)
            .is_none()
        {
            return Err(SessionError::NoMasternodesAvailable);
        }

        let candidates = self.compatible_inputs(denomination).await?;
        if candidates.is_empty() {
            return Err(SessionError::NoCompatibleInputs(denomination));
        }

        let mut locked = Vec::new();
        for input in candidates.into_iter().take(self.config.max_inputs_per_session) {
            match self.wallet.lock_input(input.outpoint).await {
                Ok(()) => locked.push(input),
                // Raced by a concurrent wallet spend; skip this input.
                Err(e) => debug!("could not lock {}: {}", input.outpoint, e),
            }
        }
        if locked.is_empty() {
            return Err(SessionError::NoCompatibleInputs(denomination));
        }

        self.next_id += 1;
        let id = SessionId(self.next_id);
        let session = Session::new(id, denomination, locked, now);
        info!(
            %id,
            %denomination,
            inputs = session.inputs.len(),
            "mixing session created"
        );
        self.sessions.insert(denomination, session);
        Ok(id)
    }

    /// Force a session into `Failed`, unlocking its inputs.
    pub async fn abort(&mut self, id: SessionId, now: Instant) -> SessionResult<()> {
        let denomination = self
            .sessions
            .values()
            .find(|s| s.id == id && !s.is_terminal())
            .map(|s| s.denomination)
            .ok_or(SessionError::UnknownSession(id.0))?;
        if let Some(mut session) = self.sessions.remove(&denomination) {
            self.fail_session(&mut session, "aborted", now).await;
        }
        Ok(())
    }

    /// Abort every live session and discard all session objects. Idempotent:
    /// a second call finds nothing to do.
    pub async fn abort_all(&mut self, reason: &str, now: Instant) {
        let denominations: Vec<Denomination> = self.sessions.keys().copied().collect();
        for denomination in denominations {
            if let Some(mut session) = self.sessions.remove(&denomination) {
                if !session.is_terminal() {
                    self.fail_session(&mut session, reason, now).await;
                }
            }
        }
    }

    /// Drive every live session one step and reap terminal ones.
    pub async fn tick(&mut self, now: Instant) {
        // Terminal sessions from the previous tick have served their purpose
        // as observable state; reap them before driving the rest.
        self.sessions.retain(|_, s| !s.is_terminal());

        let denominations: Vec<Denomination> = self.sessions.keys().copied().collect();
        for denomination in denominations {
            let Some(mut session) = self.sessions.remove(&denomination) else {
                continue;
            };
            self.drive(&mut session, now).await;
            if !session.last_message.is_empty() {
                self.last_message = session.last_message.clone();
            }
            self.sessions.insert(denomination, session);
        }
    }

    async fn drive(&mut self, session: &mut Session, now: Instant) {
        if session.is_terminal() {
            return;
        }
        if let Some(retry_at) = session.retry_at {
            if now < retry_at {
                return;
            }
            session.retry_at = None;
        }
        if session.time_in_state(now) > self.timeout_for(session.state) {
            warn!(id = %session.id, state = %session.state, "session timed out");
            let message = format!("timed out while {}", session.state);
            self.fail_session(session, message, now).await;
            return;
        }

        match session.state {
            PoolState::Idle => self.create_collateral(session, now).await,
            PoolState::CollateralPending => self.join_queue(session, now).await,
            PoolState::Queued => self.check_queue(session, now).await,
            PoolState::EntriesCollecting => self.check_signing(session, now).await,
            PoolState::Signing => self.check_final(session, now).await,
            PoolState::Complete | PoolState::Failed => {}
        }
    }

    async fn create_collateral(&mut self, session: &mut Session, now: Instant) {
        match self.collateral.create(self.wallet.as_ref()).await {
            Ok(collateral) => {
                let checked = self.collateral.validate(&collateral);
                // Attach the funding lease to the session first, so every
                // failure path from here releases it.
                session.collateral = Some(collateral);
                if let Err(e) = checked {
                    self.fail_session(session, format!("collateral invalid: {}", e), now).await;
                    return;
                }
                session.last_message = "Collateral ready".to_string();
                session.advance(PoolState::CollateralPending, now);
            }
            Err(e) => {
                self.fail_session(session, format!("collateral: {}", e), now).await;
            }
        }
    }

    async fn join_queue(&mut self, session: &mut Session, now: Instant) {
        let Some(collateral) = session.collateral.clone() else {
            self.fail_session(session, "collateral missing", now).await;
            return;
        };
        let entries = self.directory.entries().await;
        let Some(masternode) = self.selector.select(&entries, session.masternode) else {
            self.fail_session(session, "no masternodes available", now).await;
            return;
        };

        let result = self
            .relay_call(self.relay.join(&masternode, session.denomination, &collateral))
            .await;
        match result {
            Ok(ticket) => {
                info!(id = %session.id, masternode = %masternode.pro_tx_hash, "joined mixing queue");
                session.masternode = Some(masternode.pro_tx_hash);
                session.ticket = Some(ticket);
                session.last_message = "Submitted to masternode, waiting in queue".to_string();
                session.advance(PoolState::Queued, now);
            }
            Err(e) => {
                session.masternode = Some(masternode.pro_tx_hash);
                self.handle_relay_error(session, e, now).await;
            }
        }
    }

    async fn check_queue(&mut self, session: &mut Session, now: Instant) {
        let Some(ticket) = session.ticket.clone() else {
            self.fail_session(session, "queue ticket missing", now).await;
            return;
        };
        match self.relay_call(self.relay.poll_queue(&ticket)).await {
            Ok(status) if status.ready => {
                self.submit_entry(session, now).await;
            }
            Ok(status) => {
                session.last_message = format!(
                    "Waiting in queue ({}/{} participants)",
                    status.participants, status.required
                );
            }
            Err(e) => self.handle_relay_error(session, e, now).await,
        }
    }

    async fn submit_entry(&mut self, session: &mut Session, now: Instant) {
        let Some(ticket) = session.ticket.clone() else {
            self.fail_session(session, "queue ticket missing", now).await;
            return;
        };
        let Some(collateral) = session.collateral.clone() else {
            self.fail_session(session, "collateral missing", now).await;
            return;
        };

        // One fresh keypool script per input; these receive the mixed value.
        let mut outputs = Vec::with_capacity(session.inputs.len());
        for _ in &session.inputs {
            match self.wallet.fresh_script().await {
                Ok(script) => outputs.push(script),
                Err(e) => {
                    self.fail_session(session, format!("keypool: {}", e), now).await;
                    return;
                }
            }
        }

        let entry = SessionEntry {
            inputs: session
                .inputs
                .iter()
                .map(|i| TxIn {
                    previous_output: i.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: 0xffffffff,
                    witness: Witness::new(),
                })
                .collect(),
            outputs: outputs
                .iter()
                .map(|script| TxOut {
                    value: session.denomination.to_duffs(),
                    script_pubkey: script.clone(),
                })
                .collect(),
            collateral: collateral.tx.clone(),
        };

        match self.relay_call(self.relay.submit_entry(&ticket, entry)).await {
            Ok(()) => {
                session.outputs = outputs;
                session.last_message = "Entry submitted, waiting for signing".to_string();
                session.advance(PoolState::EntriesCollecting, now);
            }
            Err(e) => self.handle_relay_error(session, e, now).await,
        }
    }

    async fn check_signing(&mut self, session: &mut Session, now: Instant) {
        let Some(ticket) = session.ticket.clone() else {
            self.fail_session(session, "queue ticket missing", now).await;
            return;
        };
        let request = match self.relay_call(self.relay.poll_signing_request(&ticket)).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                self.handle_relay_error(session, e, now).await;
                return;
            }
        };

        if !self.proposal_is_sound(session, &request) {
            self.selector_penalize(session);
            self.fail_session(session, "masternode proposed a malformed transaction", now).await;
            return;
        }

        let ours: Vec<OutPoint> = session.inputs.iter().map(|i| i.outpoint).collect();
        let signatures = match self.wallet.sign_inputs(&request.unsigned_tx, &ours).await {
            Ok(signatures) => signatures,
            Err(e) => {
                self.fail_session(session, format!("signing: {}", e), now).await;
                return;
            }
        };
        match self.relay_call(self.relay.submit_signatures(&ticket, signatures)).await {
            Ok(()) => {
                session.last_message = "Signatures submitted".to_string();
                session.advance(PoolState::Signing, now);
            }
            Err(e) => self.handle_relay_error(session, e, now).await,
        }
    }

    async fn check_final(&mut self, session: &mut Session, now: Instant) {
        let Some(ticket) = session.ticket.clone() else {
            self.fail_session(session, "queue ticket missing", now).await;
            return;
        };
        match self.relay_call(self.relay.poll_final(&ticket)).await {
            Ok(Some(txid)) => self.complete_session(session, txid, now).await,
            Ok(None) => {}
            Err(e) => self.handle_relay_error(session, e, now).await,
        }
    }

    async fn complete_session(&mut self, session: &mut Session, txid: dashcore::Txid, now: Instant) {
        {
            let mut rounds = self.rounds.write().await;
            for (input, output) in session.inputs.iter().zip(&session.outputs) {
                rounds.record_completed_round(input.script(), output);
            }
        }
        self.release_locks(session).await;
        if let Some(masternode) = session.masternode {
            self.selector.note_success(masternode);
        }
        session.last_message = format!("Mixing round complete ({})", txid);
        info!(id = %session.id, %txid, "mixing session complete");
        session.advance(PoolState::Complete, now);
    }

    /// Our inputs and our expected outputs must all appear in the proposed
    /// joint transaction, otherwise the relay is misbehaving.
    fn proposal_is_sound(&self, session: &Session, request: &SigningRequest) -> bool {
        let tx = &request.unsigned_tx;
        let inputs_present = session.inputs.iter().all(|input| {
            tx.input.iter().any(|txin| txin.previous_output == input.outpoint)
        });
        let outputs_present = session.outputs.iter().all(|script| {
            tx.output.iter().any(|txout| {
                txout.script_pubkey == *script
                    && txout.value == session.denomination.to_duffs()
            })
        });
        inputs_present && outputs_present
    }

    /// Transient errors back off and retry in place, rotating the masternode
    /// at the next join. Protocol errors are terminal for the session and
    /// deprioritize the relay.
    async fn handle_relay_error(&mut self, session: &mut Session, error: RelayError, now: Instant) {
        if error.is_transient() {
            session.retries += 1;
            if session.retries > self.config.max_retries {
                self.fail_session(
                    session,
                    "too many relay failures, try again later",
                    now,
                )
                .await;
                return;
            }
            warn!(
                id = %session.id,
                retry = session.retries,
                "transient relay error: {}",
                error
            );
            session.last_message = format!("Relay error ({}), retrying", error);
            session.retry_at = Some(now + self.config.retry_delay);
        } else {
            self.selector_penalize(session);
            self.fail_session(session, format!("relay protocol error: {}", error), now).await;
        }
    }

    fn selector_penalize(&mut self, session: &Session) {
        if let Some(masternode) = session.masternode {
            self.selector.deprioritize(masternode);
        }
    }

    /// Fail a session, releasing every lease it holds. Round counters are
    /// untouched on this path.
    async fn fail_session(
        &mut self,
        session: &mut Session,
        message: impl Into<String>,
        now: Instant,
    ) {
        let message = message.into();
        warn!(id = %session.id, "session failed: {}", message);
        self.release_locks(session).await;
        self.last_message = message.clone();
        session.fail(message, now);
    }

    async fn release_locks(&self, session: &Session) {
        for input in &session.inputs {
            if let Err(e) = self.wallet.unlock_input(input.outpoint).await {
                warn!("failed to unlock {}: {}", input.outpoint, e);
            }
        }
        if let Some(collateral) = &session.collateral {
            if let Err(e) = self.wallet.unlock_input(collateral.funding_outpoint).await {
                warn!("failed to unlock collateral input {}: {}", collateral.funding_outpoint, e);
            }
        }
    }

    /// Unlocked, confirmed inputs of exactly this denomination that still
    /// need rounds.
    async fn compatible_inputs(
        &self,
        denomination: Denomination,
    ) -> SessionResult<Vec<MixingInput>> {
        let unspent = self.wallet.list_unspent().await?;
        let rounds = self.rounds.read().await;
        let mut inputs = Vec::new();
        for utxo in unspent {
            if !utxo.confirmed || self.wallet.is_locked(utxo.outpoint).await {
                continue;
            }
            let Some(denom) = self.config.denominations.classify(utxo.value()) else {
                continue;
            };
            if denom != denomination {
                continue;
            }
            let completed = rounds.rounds_of(&utxo.txout.script_pubkey);
            if completed >= self.config.target_rounds {
                continue;
            }
            inputs.push(MixingInput {
                outpoint: utxo.outpoint,
                txout: utxo.txout,
                denomination: Some(denom),
                rounds: completed,
                confirmed: true,
            });
        }
        Ok(inputs)
    }

    fn timeout_for(&self, state: PoolState) -> Duration {
        match state {
            PoolState::Signing => self.config.signing_timeout,
            _ => self.config.session_timeout,
        }
    }

    async fn relay_call<T>(&self, call: impl Future<Output = RelayResult<T>>) -> RelayResult<T> {
        match tokio::time::timeout(self.config.relay_call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout),
        }
    }
}
