//! Anti-spam collateral handling.
//!
//! Every queue join presents a small collateral transaction. The relay keeps
//! it and only ever broadcasts it (burning its fee) if the participant
//! misbehaves, so honest sessions get the funds back regardless of outcome.

use dashcore::{Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Witness};

use crate::error::{CollateralError, CollateralResult, WalletError};
use crate::types::{COLLATERAL_LOWER, COLLATERAL_UPPER, DUST_LIMIT};
use crate::wallet::{WalletStore, WalletUtxo};

/// A collateral transaction together with the value funding it.
///
/// The funding value cannot be recovered from the transaction alone, and the
/// committed collateral is exactly the fee the transaction would pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralTx {
    /// The signed collateral transaction.
    pub tx: Transaction,

    /// Outpoint of the wallet input funding the collateral. Locked for the
    /// duration of the session.
    pub funding_outpoint: OutPoint,

    /// Value of the funding input.
    pub funding_value: Amount,
}

impl CollateralTx {
    /// The committed collateral: the fee this transaction would pay.
    pub fn committed_value(&self) -> Amount {
        let spent: u64 = self.tx.output.iter().map(|o| o.value).sum();
        Amount::from_sat(self.funding_value.to_sat().saturating_sub(spent))
    }
}

/// Creates and validates collateral transactions.
#[derive(Debug, Clone, Default)]
pub struct CollateralController;

impl CollateralController {
    pub fn new() -> Self {
        CollateralController
    }

    /// Build a collateral transaction from the smallest suitable confirmed
    /// input, locking that input in the wallet.
    ///
    /// The transaction spends one input and returns everything above the
    /// collateral value to a fresh change script, leaving exactly
    /// [`COLLATERAL_LOWER`] as the committed fee.
    pub async fn create<W: WalletStore>(
        &self,
        wallet: &W,
    ) -> Result<CollateralTx, CollateralError> {
        let required = COLLATERAL_LOWER + DUST_LIMIT + 1;
        let mut candidates: Vec<WalletUtxo> = Vec::new();
        for utxo in wallet
            .list_unspent()
            .await
            .map_err(|_| CollateralError::InsufficientFunds)?
        {
            if utxo.confirmed
                && utxo.value().to_sat() >= required
                && !wallet.is_locked(utxo.outpoint).await
            {
                candidates.push(utxo);
            }
        }
        // Smallest suitable input keeps larger coins available for mixing.
        candidates.sort_by_key(|u| u.value());
        let funding = candidates.into_iter().next().ok_or(CollateralError::InsufficientFunds)?;

        wallet
            .lock_input(funding.outpoint)
            .await
            .map_err(|_| CollateralError::InsufficientFunds)?;

        let change_script = match wallet.fresh_script().await {
            Ok(script) => script,
            Err(_) => {
                let _ = wallet.unlock_input(funding.outpoint).await;
                return Err(CollateralError::InsufficientFunds);
            }
        };

        let mut tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: funding.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: 0xffffffff,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: funding.value().to_sat() - COLLATERAL_LOWER,
                script_pubkey: change_script,
            }],
            special_transaction_payload: None,
        };

        if let Ok(signed) = wallet.sign_inputs(&tx, &[funding.outpoint]).await {
            if signed.len() == 1 {
                tx.input = signed;
            }
        }

        Ok(CollateralTx {
            tx,
            funding_outpoint: funding.outpoint,
            funding_value: funding.value(),
        })
    }

    /// Structural validation applied before a collateral is relayed.
    pub fn validate(&self, collateral: &CollateralTx) -> CollateralResult<()> {
        let tx = &collateral.tx;
        if tx.input.len() != 1 {
            return Err(CollateralError::WrongInputCount(tx.input.len()));
        }
        if tx.output.is_empty() || tx.output.len() > 2 {
            return Err(CollateralError::WrongOutputCount(tx.output.len()));
        }
        for output in &tx.output {
            if output.value <= DUST_LIMIT {
                return Err(CollateralError::DustOutput(output.value));
            }
        }
        let value = collateral.committed_value().to_sat();
        if !(COLLATERAL_LOWER..=COLLATERAL_UPPER).contains(&value) {
            return Err(CollateralError::ValueOutOfRange {
                value,
                min: COLLATERAL_LOWER,
                max: COLLATERAL_UPPER,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashcore::hashes::Hash;
    use dashcore::Txid;

    fn collateral_with(funding: u64, outputs: Vec<u64>) -> CollateralTx {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([9u8; 32]),
            vout: 0,
        };
        CollateralTx {
            tx: Transaction {
                version: 2,
                lock_time: 0,
                input: vec![TxIn {
                    previous_output: outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: 0xffffffff,
                    witness: Witness::new(),
                }],
                output: outputs
                    .into_iter()
                    .map(|value| TxOut {
                        value,
                        script_pubkey: ScriptBuf::new(),
                    })
                    .collect(),
                special_transaction_payload: None,
            },
            funding_outpoint: outpoint,
            funding_value: Amount::from_sat(funding),
        }
    }

    #[test]
    fn accepts_well_formed_collateral() {
        let controller = CollateralController::new();
        let collateral = collateral_with(COLLATERAL_LOWER + 50_000, vec![50_000]);
        assert_eq!(collateral.committed_value().to_sat(), COLLATERAL_LOWER);
        assert!(controller.validate(&collateral).is_ok());
    }

    #[test]
    fn rejects_excessive_collateral_value() {
        let controller = CollateralController::new();
        let collateral = collateral_with(10 * COLLATERAL_UPPER, vec![50_000]);
        assert!(matches!(
            controller.validate(&collateral),
            Err(CollateralError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_dust_outputs() {
        let controller = CollateralController::new();
        let collateral = collateral_with(COLLATERAL_LOWER + DUST_LIMIT, vec![DUST_LIMIT]);
        assert!(matches!(
            controller.validate(&collateral),
            Err(CollateralError::DustOutput(_))
        ));
    }

    #[tokio::test]
    async fn create_releases_funding_when_keypool_is_exhausted() {
        use crate::test_utils::MockWallet;

        let wallet = MockWallet::with_keys(0);
        wallet.add_utxo(COLLATERAL_LOWER + 50_000).await;

        let controller = CollateralController::new();
        assert!(controller.create(&wallet).await.is_err());
        assert!(wallet.locked_outpoints().await.is_empty());
    }

    #[test]
    fn rejects_wrong_shape() {
        let controller = CollateralController::new();
        let mut collateral = collateral_with(COLLATERAL_LOWER + 50_000, vec![50_000]);
        collateral.tx.input.clear();
        assert!(matches!(
            controller.validate(&collateral),
            Err(CollateralError::WrongInputCount(0))
        ));

        let collateral = collateral_with(COLLATERAL_LOWER + 150_000, vec![50_000; 3]);
        assert!(matches!(
            controller.validate(&collateral),
            Err(CollateralError::WrongOutputCount(3))
        ));
    }
}
