//! End-to-end mixing flows against in-memory collaborators.

use std::sync::Arc;
use std::time::Instant;

use dash_coinjoin::denominations::COIN;
use dash_coinjoin::test_utils::{MockRelay, MockWallet, StaticBackup, StaticMasternodeDirectory};
use dash_coinjoin::{CoinJoinClient, CoinJoinConfig, SessionError, WalletError};

type TestClient =
    CoinJoinClient<MockWallet, MockRelay, StaticMasternodeDirectory, StaticBackup>;

struct Harness {
    wallet: Arc<MockWallet>,
    relay: Arc<MockRelay>,
    backup: Arc<StaticBackup>,
    client: TestClient,
}

fn harness_with(config: CoinJoinConfig, backup: StaticBackup) -> Harness {
    let wallet = Arc::new(MockWallet::new());
    let relay = Arc::new(MockRelay::cooperative());
    let directory = Arc::new(StaticMasternodeDirectory::with_nodes(3));
    let backup = Arc::new(backup);
    let client = CoinJoinClient::new(
        config,
        Arc::clone(&wallet),
        Arc::clone(&relay),
        directory,
        Arc::clone(&backup),
    )
    .expect("valid config");
    Harness {
        wallet,
        relay,
        backup,
        client,
    }
}

fn harness() -> Harness {
    harness_with(CoinJoinConfig::regtest(), StaticBackup::enabled())
}

#[tokio::test]
async fn completed_session_increments_rounds_by_one_and_unlocks() {
    let mut h = harness();
    let mixing_input = h.wallet.add_utxo(COIN).await;
    // Small non-denominated coin to fund the collateral.
    h.wallet.add_utxo(200_000).await;

    h.client.start_mixing().await.unwrap();
    let start = Instant::now();
    // Created -> collateral -> queued -> entries -> signing -> complete,
    // one state per tick.
    for _ in 0..5 {
        h.client.tick(start).await;
    }

    let entries = h.relay.submitted_entries().await;
    assert_eq!(entries.len(), 1, "exactly one entry submitted");
    let entry = &entries[0];
    assert_eq!(entry.inputs.len(), 1);
    assert_eq!(entry.inputs[0].previous_output, mixing_input);
    assert_eq!(entry.outputs.len(), 1);
    assert_eq!(entry.outputs[0].value, COIN);

    // The mixed output inherits the source's rounds plus one.
    assert_eq!(h.client.rounds_of(&entry.outputs[0].script_pubkey).await, 1);
    let source_script = h.wallet.script_of(mixing_input).await.unwrap();
    assert_eq!(h.client.rounds_of(&source_script).await, 0);

    // Every lease is released, including the collateral funding input.
    assert!(h.wallet.locked_outpoints().await.is_empty());

    let status = h.client.status().await;
    assert!(status.running);
    assert_eq!(status.active_sessions, 0);
}

#[tokio::test]
async fn non_denominated_funds_trigger_denomination_creation() {
    let mut h = harness();
    // 10.5 coins, none of it denominated.
    h.wallet.add_utxo(10 * COIN + COIN / 2).await;

    h.client.start_mixing().await.unwrap();
    h.client.tick(Instant::now()).await;

    let broadcasts = h.relay.broadcasts().await;
    assert_eq!(broadcasts.len(), 1, "one create-denominations transaction");
    // The broadcast transaction must be signed, not a bare template.
    assert!(broadcasts[0].input.iter().all(|input| !input.script_sig.is_empty()));
    let denominated: Vec<u64> = broadcasts[0]
        .output
        .iter()
        .map(|o| o.value)
        .filter(|v| *v == 10 * COIN || *v == COIN / 10)
        .collect();
    assert!(denominated.contains(&(10 * COIN)));
    assert!(denominated.len() >= 5);
}

#[tokio::test]
async fn wallet_outage_does_not_trigger_denomination_creation() {
    let mut h = harness();
    // Plenty of non-denominated funds, but the wallet read fails.
    h.wallet.add_utxo(10 * COIN + COIN / 2).await;

    h.client.start_mixing().await.unwrap();
    h.wallet
        .fail_next_list_unspent(WalletError::Unavailable("wallet database locked".into()))
        .await;
    h.client.tick(Instant::now()).await;

    assert!(h.relay.broadcasts().await.is_empty());
}

#[tokio::test]
async fn exhausted_funds_surface_a_status_message() {
    let mut h = harness();
    // Half a 0.01 denomination: nothing to mix, nothing to denominate.
    h.wallet.add_utxo(COIN / 200).await;

    h.client.start_mixing().await.unwrap();
    h.client.tick(Instant::now()).await;

    assert!(h.relay.broadcasts().await.is_empty());
    let status = h.client.status().await;
    assert_eq!(status.last_message, "Not enough funds to anonymize");
}

#[tokio::test]
async fn disabled_backups_block_mixing_entirely() {
    let mut h = harness_with(CoinJoinConfig::regtest(), StaticBackup::disabled());
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;

    let err = h.client.start_mixing().await.unwrap_err();
    assert!(matches!(err, SessionError::MixingDisabled(_)));
    assert!(!h.client.is_running());

    // No sessions, no locks, nothing sent anywhere.
    h.client.tick(Instant::now()).await;
    let status = h.client.status().await;
    assert_eq!(status.active_sessions, 0);
    assert!(h.wallet.locked_outpoints().await.is_empty());
    assert_eq!(h.relay.join_count().await, 0);
}

#[tokio::test]
async fn depleted_keypool_blocks_new_sessions() {
    let mut h = harness();
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;
    h.client.start_mixing().await.unwrap();

    // Below the hard low-water mark: the tick must not start a session.
    h.wallet.set_keys_left(10).await;
    h.client.tick(Instant::now()).await;

    let status = h.client.status().await;
    assert_eq!(status.active_sessions, 0);
    assert!(status.last_message.starts_with("Mixing unavailable"));
}

#[tokio::test]
async fn low_keypool_requests_a_backup_but_keeps_mixing() {
    let mut h = harness();
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;
    // Between the stop and warning thresholds.
    h.wallet.set_keys_left(75).await;

    h.client.start_mixing().await.unwrap();
    h.client.tick(Instant::now()).await;

    assert!(h.backup.backups_taken() >= 1);
    let status = h.client.status().await;
    assert_eq!(status.active_sessions, 1);
}

#[tokio::test]
async fn progress_reflects_anonymized_balance() {
    let config = CoinJoinConfig::regtest()
        .with_keep_amount(dash_coinjoin::Amount::from_sat(2 * COIN));
    let mut h = harness_with(config, StaticBackup::enabled());
    h.wallet.add_utxo(COIN).await;
    h.wallet.add_utxo(200_000).await;

    h.client.start_mixing().await.unwrap();
    let status = h.client.status().await;
    assert_eq!(status.denominated_balance, COIN);
    assert_eq!(status.anonymized_balance, 0);
    assert_eq!(status.progress, 0.0);
}
