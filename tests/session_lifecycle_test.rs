//! Session state machine lifecycle: timeouts, retries, aborts, resets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use dash_coinjoin::denominations::COIN;
use dash_coinjoin::test_utils::{
    MockRelay, MockWallet, SigningBehavior, StaticBackup, StaticMasternodeDirectory,
};
use dash_coinjoin::{
    CoinJoinClient, CoinJoinConfig, Denomination, DenominationSet, PoolState, RelayError,
    RoundTracker, SessionError, SessionManager, WalletError,
};

fn one_coin() -> Denomination {
    DenominationSet::standard()
        .classify(dash_coinjoin::Amount::from_sat(COIN))
        .unwrap()
}

struct ManagerHarness {
    wallet: Arc<MockWallet>,
    relay: Arc<MockRelay>,
    rounds: Arc<RwLock<RoundTracker>>,
    manager: SessionManager<MockWallet, MockRelay, StaticMasternodeDirectory>,
}

fn manager_harness(config: CoinJoinConfig) -> ManagerHarness {
    let wallet = Arc::new(MockWallet::new());
    let relay = Arc::new(MockRelay::cooperative());
    let directory = Arc::new(StaticMasternodeDirectory::with_nodes(3));
    let rounds = Arc::new(RwLock::new(RoundTracker::new()));
    let manager = SessionManager::new(
        config,
        Arc::clone(&wallet),
        Arc::clone(&relay),
        directory,
        Arc::clone(&rounds),
    );
    ManagerHarness {
        wallet,
        relay,
        rounds,
        manager,
    }
}

#[tokio::test]
async fn second_start_for_same_denomination_is_rejected() {
    let mut h = manager_harness(CoinJoinConfig::regtest());
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;

    let now = Instant::now();
    let first = h.manager.start_session(one_coin(), now).await.unwrap();
    let second = h.manager.start_session(one_coin(), now).await;
    assert_eq!(second.unwrap_err(), SessionError::AlreadyMixing(one_coin()));

    // The first session proceeds unaffected.
    h.manager.tick(now).await;
    let session = h.manager.sessions().find(|s| s.id == first).unwrap();
    assert_eq!(session.state, PoolState::CollateralPending);
}

#[tokio::test]
async fn no_compatible_inputs_creates_no_session_and_no_collateral() {
    let mut h = manager_harness(CoinJoinConfig::regtest());
    // Only a non-denominated coin; nothing matches 1 coin exactly.
    h.wallet.add_utxo(200_000).await;

    let err = h.manager.start_session(one_coin(), Instant::now()).await.unwrap_err();
    assert_eq!(err, SessionError::NoCompatibleInputs(one_coin()));
    assert_eq!(h.manager.active_sessions(), 0);
    assert!(h.wallet.locked_outpoints().await.is_empty());
}

#[tokio::test]
async fn wallet_failures_are_not_mistaken_for_exhausted_funds() {
    let mut h = manager_harness(CoinJoinConfig::regtest());
    h.wallet.add_utxo(COIN).await;
    h.wallet
        .fail_next_list_unspent(WalletError::Unavailable("wallet database locked".into()))
        .await;

    let err = h.manager.start_session(one_coin(), Instant::now()).await.unwrap_err();
    assert!(matches!(err, SessionError::Wallet(_)));
    assert_eq!(h.manager.active_sessions(), 0);
}

#[tokio::test]
async fn start_fails_while_masternode_list_syncs() {
    let wallet = Arc::new(MockWallet::new());
    wallet.add_utxo(COIN).await;
    let relay = Arc::new(MockRelay::cooperative());
    let directory = Arc::new(StaticMasternodeDirectory::with_nodes(3));
    directory.set_synced(false);
    let rounds = Arc::new(RwLock::new(RoundTracker::new()));
    let mut manager = SessionManager::new(
        CoinJoinConfig::regtest(),
        wallet,
        relay,
        directory,
        rounds,
    );

    let err = manager.start_session(one_coin(), Instant::now()).await.unwrap_err();
    assert_eq!(err, SessionError::SyncInProgress);
}

#[tokio::test]
async fn empty_masternode_list_fails_start() {
    let wallet = Arc::new(MockWallet::new());
    wallet.add_utxo(COIN).await;
    let relay = Arc::new(MockRelay::cooperative());
    let directory = Arc::new(StaticMasternodeDirectory::empty());
    let rounds = Arc::new(RwLock::new(RoundTracker::new()));
    let mut manager = SessionManager::new(
        CoinJoinConfig::regtest(),
        wallet,
        relay,
        directory,
        rounds,
    );

    let err = manager.start_session(one_coin(), Instant::now()).await.unwrap_err();
    assert_eq!(err, SessionError::NoMasternodesAvailable);
}

#[tokio::test]
async fn multi_session_bound_is_enforced() {
    let config = CoinJoinConfig::regtest().with_max_sessions(2);
    let mut h = manager_harness(config);
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(10 * COIN).await;
    h.wallet.add_utxo(COIN / 10).await;

    let now = Instant::now();
    let ten = DenominationSet::standard()
        .classify(dash_coinjoin::Amount::from_sat(10 * COIN))
        .unwrap();
    let tenth = DenominationSet::standard()
        .classify(dash_coinjoin::Amount::from_sat(COIN / 10))
        .unwrap();

    h.manager.start_session(one_coin(), now).await.unwrap();
    h.manager.start_session(ten, now).await.unwrap();
    let third = h.manager.start_session(tenth, now).await;
    assert_eq!(third.unwrap_err(), SessionError::MaxSessionsReached(2));
}

#[tokio::test]
async fn missing_signing_request_times_out_without_touching_rounds() {
    let mut h = manager_harness(CoinJoinConfig::regtest());
    h.relay.set_signing_behavior(SigningBehavior::Never).await;
    let mixing_input = h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;

    let start = Instant::now();
    let id = h.manager.start_session(one_coin(), start).await.unwrap();
    for _ in 0..3 {
        h.manager.tick(start).await;
    }
    {
        let session = h.manager.sessions().find(|s| s.id == id).unwrap();
        assert_eq!(session.state, PoolState::EntriesCollecting);
    }

    // Well past the session timeout, still no signing request.
    h.manager.tick(start + Duration::from_secs(300)).await;

    let session = h.manager.sessions().find(|s| s.id == id).unwrap();
    assert_eq!(session.state, PoolState::Failed);
    assert!(h.wallet.locked_outpoints().await.is_empty());

    let entries = h.relay.submitted_entries().await;
    let mixed_script = &entries[0].outputs[0].script_pubkey;
    let source_script = h.wallet.script_of(mixing_input).await.unwrap();
    // Failed sessions leave every round counter unchanged.
    let rounds = h.rounds.read().await;
    assert_eq!(rounds.rounds_of(mixed_script), 0);
    assert_eq!(rounds.rounds_of(&source_script), 0);
}

#[tokio::test]
async fn transient_join_errors_retry_with_backoff() {
    let mut h = manager_harness(CoinJoinConfig::regtest());
    h.relay.fail_joins_with(vec![RelayError::QueueFull]).await;
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;

    let start = Instant::now();
    let id = h.manager.start_session(one_coin(), start).await.unwrap();
    h.manager.tick(start).await; // collateral created
    h.manager.tick(start).await; // join fails: queue full

    {
        let session = h.manager.sessions().find(|s| s.id == id).unwrap();
        assert_eq!(session.state, PoolState::CollateralPending);
        assert_eq!(session.retries, 1);
    }

    // Before the backoff expires nothing happens.
    h.manager.tick(start + Duration::from_secs(1)).await;
    assert_eq!(h.relay.join_count().await, 1);

    // After the backoff the join is retried and succeeds.
    h.manager.tick(start + Duration::from_secs(6)).await;
    assert_eq!(h.relay.join_count().await, 2);
    let session = h.manager.sessions().find(|s| s.id == id).unwrap();
    assert_eq!(session.state, PoolState::Queued);
}

#[tokio::test]
async fn protocol_error_fails_the_session_immediately() {
    let mut h = manager_harness(CoinJoinConfig::regtest());
    h.relay.fail_joins_with(vec![RelayError::IncompatibleVersion(70001)]).await;
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;

    let start = Instant::now();
    let id = h.manager.start_session(one_coin(), start).await.unwrap();
    h.manager.tick(start).await;
    h.manager.tick(start).await;

    let session = h.manager.sessions().find(|s| s.id == id).unwrap();
    assert_eq!(session.state, PoolState::Failed);
    assert!(h.wallet.locked_outpoints().await.is_empty());
    // No retry for protocol errors.
    assert_eq!(h.relay.join_count().await, 1);
}

#[tokio::test]
async fn malformed_signing_request_is_terminal() {
    let mut h = manager_harness(CoinJoinConfig::regtest());
    h.relay.set_signing_behavior(SigningBehavior::Malformed).await;
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;

    let start = Instant::now();
    let id = h.manager.start_session(one_coin(), start).await.unwrap();
    for _ in 0..4 {
        h.manager.tick(start).await;
    }

    let session = h.manager.sessions().find(|s| s.id == id).unwrap();
    assert_eq!(session.state, PoolState::Failed);
    assert!(h.wallet.locked_outpoints().await.is_empty());
}

#[tokio::test]
async fn reset_is_idempotent_and_releases_all_locks() {
    let wallet = Arc::new(MockWallet::new());
    wallet.add_utxo(COIN).await;
    wallet.add_utxo(200_000).await;
    let relay = Arc::new(MockRelay::cooperative());
    relay.set_queue_polls_before_ready(100).await;
    let directory = Arc::new(StaticMasternodeDirectory::with_nodes(3));
    let backup = Arc::new(StaticBackup::enabled());
    let mut client = CoinJoinClient::new(
        CoinJoinConfig::regtest(),
        Arc::clone(&wallet),
        relay,
        directory,
        backup,
    )
    .unwrap();

    client.start_mixing().await.unwrap();
    let start = Instant::now();
    client.tick(start).await;
    client.tick(start).await;
    assert!(!wallet.locked_outpoints().await.is_empty());

    client.reset_mixing(start).await;
    assert!(wallet.locked_outpoints().await.is_empty());
    assert_eq!(client.status().await.active_sessions, 0);

    // A second reset finds nothing to do and changes nothing.
    client.reset_mixing(start).await;
    assert!(wallet.locked_outpoints().await.is_empty());
    assert_eq!(client.status().await.active_sessions, 0);
}

#[tokio::test]
async fn stop_mixing_aborts_sessions_and_disables_ticks() {
    let wallet = Arc::new(MockWallet::new());
    wallet.add_utxo(COIN).await;
    wallet.add_utxo(200_000).await;
    let relay = Arc::new(MockRelay::cooperative());
    relay.set_queue_polls_before_ready(100).await;
    let directory = Arc::new(StaticMasternodeDirectory::with_nodes(3));
    let backup = Arc::new(StaticBackup::enabled());
    let mut client = CoinJoinClient::new(
        CoinJoinConfig::regtest(),
        Arc::clone(&wallet),
        relay,
        directory,
        backup,
    )
    .unwrap();

    client.start_mixing().await.unwrap();
    let start = Instant::now();
    client.tick(start).await;
    client.stop_mixing(start).await;

    assert!(!client.is_running());
    assert!(wallet.locked_outpoints().await.is_empty());

    // Ticks are inert while stopped.
    client.tick(start).await;
    assert_eq!(client.status().await.active_sessions, 0);
}
