//! In-memory wallet mock.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashcore::hashes::Hash;
use dashcore::{OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Txid, Witness};
use tokio::sync::Mutex;

use crate::error::{WalletError, WalletResult};
use crate::wallet::{WalletStore, WalletUtxo};

#[derive(Debug, Default)]
struct WalletState {
    utxos: HashMap<OutPoint, WalletUtxo>,
    locked: HashSet<OutPoint>,
    keys_left: u32,
    next_outpoint: u8,
    next_script: u64,
    list_unspent_error: Option<WalletError>,
}

/// A wallet backed by plain maps, with an explicit keypool counter.
#[derive(Debug)]
pub struct MockWallet {
    state: Mutex<WalletState>,
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::with_keys(1000)
    }
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A wallet whose keypool holds exactly `keys` unused keys.
    pub fn with_keys(keys: u32) -> Self {
        MockWallet {
            state: Mutex::new(WalletState {
                keys_left: keys,
                next_outpoint: 1,
                ..WalletState::default()
            }),
        }
    }

    /// Add a confirmed UTXO of `value` duffs, returning its outpoint.
    pub async fn add_utxo(&self, value: u64) -> OutPoint {
        self.add_utxo_with(value, true).await
    }

    /// Add a UTXO with explicit confirmation status.
    pub async fn add_utxo_with(&self, value: u64, confirmed: bool) -> OutPoint {
        let mut state = self.state.lock().await;
        let n = state.next_outpoint;
        state.next_outpoint += 1;
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([n; 32]),
            vout: 0,
        };
        let script = ScriptBuf::from(vec![0x76, 0xa9, 0x14, n]);
        state.utxos.insert(
            outpoint,
            WalletUtxo {
                outpoint,
                txout: TxOut {
                    value,
                    script_pubkey: script,
                },
                confirmed,
            },
        );
        outpoint
    }

    /// The script currently held by a UTXO, for round-tracker assertions.
    pub async fn script_of(&self, outpoint: OutPoint) -> Option<ScriptBuf> {
        let state = self.state.lock().await;
        state.utxos.get(&outpoint).map(|u| u.txout.script_pubkey.clone())
    }

    /// Outpoints currently locked, for double-lease assertions.
    pub async fn locked_outpoints(&self) -> HashSet<OutPoint> {
        self.state.lock().await.locked.clone()
    }

    /// Shrink the keypool, e.g. to trip the backup guard.
    pub async fn set_keys_left(&self, keys: u32) {
        self.state.lock().await.keys_left = keys;
    }

    /// Make the next `list_unspent` call fail with `error`.
    pub async fn fail_next_list_unspent(&self, error: WalletError) {
        self.state.lock().await.list_unspent_error = Some(error);
    }
}

#[async_trait]
impl WalletStore for MockWallet {
    async fn list_unspent(&self) -> WalletResult<Vec<WalletUtxo>> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.list_unspent_error.take() {
            return Err(error);
        }
        Ok(state.utxos.values().cloned().collect())
    }

    async fn lock_input(&self, outpoint: OutPoint) -> WalletResult<()> {
        let mut state = self.state.lock().await;
        if !state.locked.insert(outpoint) {
            return Err(WalletError::InputLocked(outpoint.to_string()));
        }
        Ok(())
    }

    async fn unlock_input(&self, outpoint: OutPoint) -> WalletResult<()> {
        self.state.lock().await.locked.remove(&outpoint);
        Ok(())
    }

    async fn is_locked(&self, outpoint: OutPoint) -> bool {
        self.state.lock().await.locked.contains(&outpoint)
    }

    async fn fresh_script(&self) -> WalletResult<ScriptBuf> {
        let mut state = self.state.lock().await;
        if state.keys_left == 0 {
            return Err(WalletError::KeypoolExhausted);
        }
        state.keys_left -= 1;
        state.next_script += 1;
        let n = state.next_script;
        Ok(ScriptBuf::from(vec![
            0x76,
            0xa9,
            0x14,
            0xf0,
            (n >> 8) as u8,
            n as u8,
        ]))
    }

    async fn keys_left(&self) -> u32 {
        self.state.lock().await.keys_left
    }

    async fn sign_inputs(
        &self,
        _unsigned: &Transaction,
        ours: &[OutPoint],
    ) -> WalletResult<Vec<TxIn>> {
        Ok(ours
            .iter()
            .map(|outpoint| TxIn {
                previous_output: *outpoint,
                script_sig: ScriptBuf::from(vec![0x01]),
                sequence: 0xffffffff,
                witness: Witness::new(),
            })
            .collect())
    }
}
