//! Fixed denominations and the planning engine that standardizes wallet
//! funds into them.
//!
//! Mixing only ever operates on outputs whose value exactly matches one of a
//! fixed denomination set, so that mixed outputs are indistinguishable from
//! one another. The [`DenominationEngine`] partitions non-denominated value
//! into such outputs ahead of mixing.

use std::fmt;

use dashcore::{Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};

use crate::error::{DenominationError, DenominationResult, WalletResult};
use crate::types::{DUST_LIMIT, MixingInput};
use crate::wallet::WalletStore;

/// One duff-denominated coin unit (1 DASH).
pub const COIN: u64 = 100_000_000;

/// Flat fee reserved for a create-denominations transaction.
pub const CREATE_DENOMINATIONS_FEE: u64 = 10_000;

/// Upper bound on outputs in one create-denominations transaction.
const MAX_PLAN_OUTPUTS: usize = 40;

/// A fixed standard coin amount used for mixed outputs.
///
/// Stored as duffs. Values come only from a validated [`DenominationSet`];
/// they are never altered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Denomination(u64);

impl Denomination {
    /// Construct from a raw duff value. Public within the crate so the
    /// validated set is the only external source of denominations.
    pub(crate) const fn from_duffs(duffs: u64) -> Self {
        Denomination(duffs)
    }

    /// The denomination value in duffs.
    pub fn to_duffs(self) -> u64 {
        self.0
    }

    /// The denomination value as an [`Amount`].
    pub fn amount(self) -> Amount {
        Amount::from_sat(self.0)
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Amount::from_sat(self.0))
    }
}

/// Immutable, validated set of denominations, ordered largest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationSet {
    denominations: Vec<Denomination>,
}

impl DenominationSet {
    /// The standard set: 10, 1, 0.1 and 0.01 coin units.
    pub fn standard() -> Self {
        DenominationSet {
            denominations: vec![
                Denomination(10 * COIN),
                Denomination(COIN),
                Denomination(COIN / 10),
                Denomination(COIN / 100),
            ],
        }
    }

    /// Build a set from raw duff values, validating it.
    ///
    /// The set must be non-empty, strictly descending (which also rules out
    /// duplicates), and every value must sit above the dust limit.
    pub fn new(duff_values: Vec<u64>) -> DenominationResult<Self> {
        if duff_values.is_empty() {
            return Err(DenominationError::InvalidSet("empty set".to_string()));
        }
        for pair in duff_values.windows(2) {
            if pair[0] <= pair[1] {
                return Err(DenominationError::InvalidSet(format!(
                    "values must be strictly descending, got {} before {}",
                    pair[0], pair[1]
                )));
            }
        }
        if let Some(&small) = duff_values.last() {
            if small <= DUST_LIMIT {
                return Err(DenominationError::InvalidSet(format!(
                    "smallest denomination {} is not above the dust limit {}",
                    small, DUST_LIMIT
                )));
            }
        }
        Ok(DenominationSet {
            denominations: duff_values.into_iter().map(Denomination).collect(),
        })
    }

    /// Denominations, largest first.
    pub fn iter(&self) -> impl Iterator<Item = Denomination> + '_ {
        self.denominations.iter().copied()
    }

    /// Number of denominations in the set.
    pub fn len(&self) -> usize {
        self.denominations.len()
    }

    /// Whether the set is empty. Validated sets never are.
    pub fn is_empty(&self) -> bool {
        self.denominations.is_empty()
    }

    /// Smallest denomination in the set.
    pub fn smallest(&self) -> Denomination {
        *self.denominations.last().expect("validated set is non-empty")
    }

    /// Largest denomination in the set.
    pub fn largest(&self) -> Denomination {
        *self.denominations.first().expect("validated set is non-empty")
    }

    /// Whether `denomination` belongs to this set.
    pub fn contains(&self, denomination: Denomination) -> bool {
        self.denominations.contains(&denomination)
    }

    /// Classify an amount as one of the fixed denominations, or `None` for
    /// non-denominated value. Only exact matches count.
    pub fn classify(&self, amount: Amount) -> Option<Denomination> {
        let duffs = amount.to_sat();
        self.denominations.iter().copied().find(|d| d.0 == duffs)
    }
}

/// A planned partition of value into standard denomination outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenominationPlan {
    /// Denomination outputs to create, largest first.
    pub outputs: Vec<Denomination>,
    /// Value left over after all planned outputs, before fees.
    pub change: Amount,
}

impl DenominationPlan {
    /// Total value of all planned denomination outputs.
    pub fn total(&self) -> Amount {
        Amount::from_sat(self.outputs.iter().map(|d| d.to_duffs()).sum())
    }
}

/// Plans and builds create-denominations transactions.
#[derive(Debug, Clone)]
pub struct DenominationEngine {
    set: DenominationSet,
}

impl DenominationEngine {
    pub fn new(set: DenominationSet) -> Self {
        DenominationEngine {
            set,
        }
    }

    /// The denomination set this engine standardizes to.
    pub fn set(&self) -> &DenominationSet {
        &self.set
    }

    /// Greedily partition `available` into denomination outputs, largest
    /// first, not exceeding `target` total denominated value.
    ///
    /// Fails with `InsufficientFunds` when the funds do not cover even one
    /// smallest denomination plus the transaction fee.
    pub fn plan(&self, available: Amount, target: Amount) -> DenominationResult<DenominationPlan> {
        let required = self.set.smallest().to_duffs() + CREATE_DENOMINATIONS_FEE;
        if available.to_sat() < required {
            return Err(DenominationError::InsufficientFunds {
                available: available.to_sat(),
                required,
            });
        }

        let mut remaining = available.to_sat().min(target.to_sat());
        let mut outputs = Vec::new();
        for denom in self.set.iter() {
            while remaining >= denom.to_duffs() && outputs.len() < MAX_PLAN_OUTPUTS {
                outputs.push(denom);
                remaining -= denom.to_duffs();
            }
        }
        let change = available.to_sat() - outputs.iter().map(|d| d.to_duffs()).sum::<u64>();
        Ok(DenominationPlan {
            outputs,
            change: Amount::from_sat(change),
        })
    }

    /// Build a signed create-denominations transaction from a plan.
    ///
    /// Spends the given candidate inputs, emits one output per planned
    /// denomination to a fresh keypool script, and pays the fee out of
    /// change. When change cannot cover the fee, the smallest planned
    /// outputs are dropped until it can. The resulting transaction is
    /// signed by the wallet and broadcast independently of mixing; its
    /// outputs become mixing inputs once confirmed.
    pub async fn build_transaction<W: WalletStore>(
        &self,
        plan: &DenominationPlan,
        inputs: &[MixingInput],
        wallet: &W,
    ) -> WalletResult<Transaction> {
        let funded: u64 = inputs.iter().map(|i| i.value().to_sat()).sum();
        let mut outputs = plan.outputs.clone();
        let mut spent: u64 = outputs.iter().map(|d| d.to_duffs()).sum();
        while !outputs.is_empty() && funded < spent + CREATE_DENOMINATIONS_FEE {
            let dropped = outputs.pop().expect("outputs is non-empty");
            spent -= dropped.to_duffs();
        }

        let mut tx_outputs = Vec::with_capacity(outputs.len() + 1);
        for denom in &outputs {
            tx_outputs.push(TxOut {
                value: denom.to_duffs(),
                script_pubkey: wallet.fresh_script().await?,
            });
        }
        let change = funded - spent - CREATE_DENOMINATIONS_FEE;
        if change > DUST_LIMIT {
            tx_outputs.push(TxOut {
                value: change,
                script_pubkey: wallet.fresh_script().await?,
            });
        }

        let mut tx = Transaction {
            version: 2,
            lock_time: 0,
            input: inputs
                .iter()
                .map(|i| TxIn {
                    previous_output: i.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: 0xffffffff,
                    witness: Witness::new(),
                })
                .collect(),
            output: tx_outputs,
            special_transaction_payload: None,
        };
        let ours: Vec<OutPoint> = inputs.iter().map(|i| i.outpoint).collect();
        tx.input = wallet.sign_inputs(&tx, &ours).await?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_set_is_descending() {
        let set = DenominationSet::standard();
        assert_eq!(set.len(), 4);
        assert_eq!(set.largest().to_duffs(), 10 * COIN);
        assert_eq!(set.smallest().to_duffs(), COIN / 100);
    }

    #[test]
    fn rejects_malformed_sets() {
        assert!(DenominationSet::new(vec![]).is_err());
        assert!(DenominationSet::new(vec![COIN, COIN]).is_err());
        assert!(DenominationSet::new(vec![COIN / 100, COIN]).is_err());
        assert!(DenominationSet::new(vec![COIN, 100]).is_err());
    }

    #[test]
    fn classify_requires_exact_match() {
        let set = DenominationSet::standard();
        assert_eq!(
            set.classify(Amount::from_sat(COIN)),
            Some(Denomination::from_duffs(COIN))
        );
        assert_eq!(set.classify(Amount::from_sat(COIN + 1)), None);
        assert_eq!(set.classify(Amount::from_sat(0)), None);
    }

    #[test]
    fn plans_ten_and_a_half_coins() {
        // 10.5 coins should partition as one 10 plus five 0.1 outputs.
        let engine = DenominationEngine::new(DenominationSet::standard());
        let plan = engine
            .plan(Amount::from_sat(10 * COIN + COIN / 2), Amount::from_sat(1000 * COIN))
            .expect("10.5 coins is plenty for one denomination");

        let expected: Vec<u64> = vec![10 * COIN, COIN / 10, COIN / 10, COIN / 10, COIN / 10, COIN / 10];
        let planned: Vec<u64> = plan.outputs.iter().map(|d| d.to_duffs()).collect();
        assert_eq!(planned, expected);
        assert_eq!(plan.change, Amount::from_sat(0));
    }

    #[test]
    fn plan_respects_target() {
        let engine = DenominationEngine::new(DenominationSet::standard());
        let plan = engine
            .plan(Amount::from_sat(100 * COIN), Amount::from_sat(10 * COIN))
            .unwrap();
        assert_eq!(plan.total(), Amount::from_sat(10 * COIN));
    }

    #[tokio::test]
    async fn build_transaction_signs_every_input() {
        use crate::test_utils::MockWallet;

        let wallet = MockWallet::new();
        let outpoint = wallet.add_utxo(10 * COIN + COIN / 2).await;
        let inputs = vec![MixingInput {
            outpoint,
            txout: TxOut {
                value: 10 * COIN + COIN / 2,
                script_pubkey: wallet.script_of(outpoint).await.unwrap(),
            },
            denomination: None,
            rounds: 0,
            confirmed: true,
        }];

        let engine = DenominationEngine::new(DenominationSet::standard());
        let plan = engine
            .plan(Amount::from_sat(10 * COIN + COIN / 2), Amount::from_sat(1000 * COIN))
            .unwrap();
        let tx = engine.build_transaction(&plan, &inputs, &wallet).await.unwrap();

        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].previous_output, outpoint);
        assert!(tx.input.iter().all(|input| !input.script_sig.is_empty()));
    }

    #[test]
    fn insufficient_funds_below_smallest_denomination() {
        let engine = DenominationEngine::new(DenominationSet::standard());
        let err = engine
            .plan(Amount::from_sat(COIN / 100), Amount::from_sat(COIN))
            .unwrap_err();
        assert!(matches!(err, DenominationError::InsufficientFunds { .. }));
    }
}
