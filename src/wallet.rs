//! Wallet collaborator traits.
//!
//! The mixing engine never owns keys or UTXOs. It reserves inputs through the
//! wallet's locking API, draws fresh change scripts from its keypool, and asks
//! it to sign our inputs of the joint transaction. Implementations live
//! outside this crate; `test_utils` provides an in-memory mock.

use async_trait::async_trait;
use dashcore::{Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut};

use crate::error::WalletResult;

/// A wallet UTXO candidate offered to the mixing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletUtxo {
    /// The outpoint (transaction hash + output index).
    pub outpoint: OutPoint,

    /// The output containing value and script.
    pub txout: TxOut,

    /// Whether the creating transaction is confirmed.
    pub confirmed: bool,
}

impl WalletUtxo {
    /// Value of the underlying output.
    pub fn value(&self) -> Amount {
        Amount::from_sat(self.txout.value)
    }
}

/// Access to the wallet's UTXO set, input locks, keypool and signer.
///
/// Input lock mutations must be serialized by the implementation: both the
/// mixing engine and ordinary transaction creation read and write lock state,
/// and a locked input must stay excluded from normal coin selection for the
/// whole session it participates in.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// All spendable UTXOs, including currently locked ones.
    async fn list_unspent(&self) -> WalletResult<Vec<WalletUtxo>>;

    /// Reserve an input for mixing, excluding it from ordinary spending.
    /// Fails if the input is already locked.
    async fn lock_input(&self, outpoint: OutPoint) -> WalletResult<()>;

    /// Release a previously locked input. Unlocking an unlocked input is a
    /// no-op.
    async fn unlock_input(&self, outpoint: OutPoint) -> WalletResult<()>;

    /// Whether an input is currently locked.
    async fn is_locked(&self, outpoint: OutPoint) -> bool;

    /// Draw one unused script from the keypool. Each draw permanently
    /// consumes a key.
    async fn fresh_script(&self) -> WalletResult<ScriptBuf>;

    /// Number of unused keys remaining in the keypool.
    async fn keys_left(&self) -> u32;

    /// Sign our inputs of `unsigned`, returning the fully scripted inputs in
    /// the order they appear in `ours`.
    async fn sign_inputs(
        &self,
        unsigned: &Transaction,
        ours: &[OutPoint],
    ) -> WalletResult<Vec<TxIn>>;
}

/// The wallet backup subsystem.
///
/// Mixing burns through keypool addresses, so new sessions are gated on this
/// collaborator by the backup guard.
#[async_trait]
pub trait BackupProvider: Send + Sync {
    /// Whether automatic wallet backups are enabled.
    async fn automatic_backups_enabled(&self) -> bool;

    /// Request a fresh backup, typically after the keypool was topped up.
    async fn trigger_backup(&self) -> WalletResult<()>;
}
