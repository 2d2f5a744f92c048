//! The mixing coordinator.
//!
//! [`CoinJoinClient`] owns the session manager, round tracker, denomination
//! engine and backup guard, and wires them to the injected wallet, relay,
//! masternode directory and backup collaborators. It is an explicit object,
//! not a singleton: tests create as many instances as they like.
//!
//! The client is tick-driven. [`tick`](CoinJoinClient::tick) advances every
//! active session exactly one step and can be called from any scheduler;
//! [`run`](CoinJoinClient::run) wraps it in a tokio interval loop cancelled
//! through a [`CancellationToken`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backup::BackupGuard;
use crate::denominations::{Denomination, DenominationEngine};
use crate::error::{DenominationError, Result, SessionError, SessionResult};
use crate::masternode::MasternodeDirectory;
use crate::relay::RelayClient;
use crate::rounds::RoundTracker;
use crate::session::SessionManager;
use crate::types::{MixingInput, MixingStatus};
use crate::wallet::{BackupProvider, WalletStore};

use super::CoinJoinConfig;

/// Interval between ticks when driven by [`CoinJoinClient::run`].
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Client-side CoinJoin mixing coordinator.
///
/// Generic over its four collaborator seams (wallet, relay, masternode
/// directory, backup subsystem) so the whole engine runs against in-memory
/// mocks in tests.
pub struct CoinJoinClient<W, R, M, B> {
    config: CoinJoinConfig,
    wallet: Arc<W>,
    relay: Arc<R>,
    backup: Arc<B>,
    guard: BackupGuard,
    engine: DenominationEngine,
    rounds: Arc<RwLock<RoundTracker>>,
    manager: SessionManager<W, R, M>,
    running: bool,
    last_message: String,
    last_denominations_tx: Option<Instant>,
}

impl<W, R, M, B> CoinJoinClient<W, R, M, B>
where
    W: WalletStore,
    R: RelayClient,
    M: MasternodeDirectory,
    B: BackupProvider,
{
    /// Create a client from a validated configuration and its collaborators.
    ///
    /// Round counters are restored from `rounds_state_path` when configured.
    pub fn new(
        config: CoinJoinConfig,
        wallet: Arc<W>,
        relay: Arc<R>,
        directory: Arc<M>,
        backup: Arc<B>,
    ) -> Result<Self> {
        config.validate()?;
        let tracker = match &config.rounds_state_path {
            Some(path) => RoundTracker::load(path)?,
            None => RoundTracker::new(),
        };
        let rounds = Arc::new(RwLock::new(tracker));
        let manager = SessionManager::new(
            config.clone(),
            Arc::clone(&wallet),
            Arc::clone(&relay),
            directory,
            Arc::clone(&rounds),
        );
        Ok(CoinJoinClient {
            engine: DenominationEngine::new(config.denominations.clone()),
            config,
            wallet,
            relay,
            backup,
            guard: BackupGuard::default(),
            rounds,
            manager,
            running: false,
            last_message: String::new(),
            last_denominations_tx: None,
        })
    }

    /// Whether mixing is enabled.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Enable mixing.
    ///
    /// Fails with `MixingDisabled` (and starts zero sessions) when the
    /// backup guard blocks: backups off or keypool below the low-water mark.
    pub async fn start_mixing(&mut self) -> SessionResult<()> {
        if self.running {
            return Ok(());
        }
        self.guard
            .check(self.wallet.as_ref(), self.backup.as_ref())
            .await
            .map_err(SessionError::MixingDisabled)?;
        info!("mixing started");
        self.running = true;
        self.last_message = "Mixing started".to_string();
        Ok(())
    }

    /// Disable mixing and abort every active session, releasing all input
    /// leases. Round counters are persisted if a state path is configured.
    pub async fn stop_mixing(&mut self, now: Instant) {
        if self.running {
            info!("mixing stopped");
        }
        self.running = false;
        self.manager.abort_all("mixing stopped", now).await;
        self.persist_rounds().await;
        self.last_message = "Mixing stopped".to_string();
    }

    /// Abort every active session without toggling the enable flag.
    /// Idempotent: a second reset finds no session and no lock to release.
    pub async fn reset_mixing(&mut self, now: Instant) {
        self.manager.abort_all("mixing reset", now).await;
        self.last_message = "Mixing reset".to_string();
    }

    /// Advance the mixing engine one step.
    ///
    /// Starts sessions for denominations with compatible inputs (bounded by
    /// `max_sessions`), creates denominations when the wallet has none left
    /// to mix, and drives every active session's state machine.
    pub async fn tick(&mut self, now: Instant) {
        if !self.running {
            return;
        }

        match self.guard.check(self.wallet.as_ref(), self.backup.as_ref()).await {
            Ok(()) => self.schedule_sessions(now).await,
            Err(blocked) => {
                // Hard stop for new sessions; active ones may still finish.
                self.last_message = format!("Mixing unavailable: {}", blocked);
            }
        }

        self.manager.tick(now).await;
        if !self.manager.last_message().is_empty() {
            self.last_message = self.manager.last_message().to_string();
        }
    }

    /// Drive the engine until `shutdown` fires, ticking once per second.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.stop_mixing(Instant::now()).await;
                    return;
                }
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
            }
        }
    }

    /// Snapshot of mixing state for status displays.
    pub async fn status(&self) -> MixingStatus {
        let mut denominated = 0u64;
        let mut anonymized = 0u64;
        if let Ok(unspent) = self.wallet.list_unspent().await {
            let rounds = self.rounds.read().await;
            for utxo in &unspent {
                if self.config.denominations.classify(utxo.value()).is_none() {
                    continue;
                }
                denominated += utxo.txout.value;
                if rounds.is_fully_anonymized(&utxo.txout.script_pubkey, self.config.target_rounds)
                {
                    anonymized += utxo.txout.value;
                }
            }
        }
        let progress =
            (anonymized as f64 / self.config.keep_amount.to_sat() as f64 * 100.0).min(100.0);

        MixingStatus {
            running: self.running,
            active_sessions: self.manager.active_sessions(),
            progress,
            last_message: self.last_message.clone(),
            keys_left: self.wallet.keys_left().await,
            denominated_balance: denominated,
            anonymized_balance: anonymized,
            updated_at: std::time::SystemTime::now(),
        }
    }

    /// Completed rounds for a script, for wallet displays.
    pub async fn rounds_of(&self, script: &dashcore::ScriptBuf) -> u32 {
        self.rounds.read().await.rounds_of(script)
    }

    async fn schedule_sessions(&mut self, now: Instant) {
        let denominations: Vec<Denomination> = self.config.denominations.iter().collect();
        let mut exhausted = 0usize;

        for denomination in &denominations {
            match self.manager.start_session(*denomination, now).await {
                Ok(id) => debug!(%id, %denomination, "session scheduled"),
                Err(SessionError::AlreadyMixing(_)) => {}
                Err(SessionError::MaxSessionsReached(_)) => break,
                Err(SessionError::NoCompatibleInputs(_)) => exhausted += 1,
                Err(e) => {
                    self.last_message = e.to_string();
                    return;
                }
            }
        }

        // Every denomination came back empty and nothing is mixing: fall
        // back to standardizing non-denominated funds.
        if exhausted == denominations.len() && self.manager.active_sessions() == 0 {
            self.create_denominations(now).await;
        }
    }

    /// Build and broadcast a create-denominations transaction from
    /// non-denominated funds. Broadcast independently of mixing; its outputs
    /// become mixing inputs once confirmed.
    async fn create_denominations(&mut self, now: Instant) {
        // Avoid rebroadcasting while a previous attempt is still confirming.
        if let Some(last) = self.last_denominations_tx {
            if now.saturating_duration_since(last) < self.config.session_timeout {
                return;
            }
        }

        let Ok(unspent) = self.wallet.list_unspent().await else {
            return;
        };
        let mut inputs: Vec<MixingInput> = Vec::new();
        for utxo in unspent {
            if !utxo.confirmed
                || self.wallet.is_locked(utxo.outpoint).await
                || self.config.denominations.classify(utxo.value()).is_some()
            {
                continue;
            }
            inputs.push(MixingInput {
                outpoint: utxo.outpoint,
                txout: utxo.txout,
                denomination: None,
                rounds: 0,
                confirmed: true,
            });
        }
        let available: u64 = inputs.iter().map(|i| i.value().to_sat()).sum();

        let plan = match self
            .engine
            .plan(dashcore::Amount::from_sat(available), self.config.keep_amount)
        {
            Ok(plan) => plan,
            Err(DenominationError::InsufficientFunds { .. }) => {
                self.last_message = "Not enough funds to anonymize".to_string();
                return;
            }
            Err(e) => {
                self.last_message = e.to_string();
                return;
            }
        };

        let tx = match self.engine.build_transaction(&plan, &inputs, self.wallet.as_ref()).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!("failed to build denominations transaction: {}", e);
                return;
            }
        };
        match self.relay.broadcast_transaction(&tx).await {
            Ok(txid) => {
                info!(%txid, outputs = plan.outputs.len(), "created denominations");
                self.last_message = "Created denominations".to_string();
                self.last_denominations_tx = Some(now);
            }
            Err(e) => {
                warn!("denominations broadcast failed: {}", e);
                self.last_message = format!("Denominations broadcast failed: {}", e);
            }
        }
    }

    async fn persist_rounds(&self) {
        if let Some(path) = &self.config.rounds_state_path {
            if let Err(e) = self.rounds.read().await.save(path) {
                warn!("failed to persist round counters: {}", e);
            }
        }
    }
}
