//! Masternode directory access and relay selection.
//!
//! The directory itself is an external collaborator (the masternode list is
//! maintained by the sync layer); this module only consumes it. The
//! [`MasternodeSelector`] picks a random compatible entry per attempt and
//! deprioritizes masternodes that caused protocol failures.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use dashcore::Txid;
use rand::seq::SliceRandom;

/// Minimum protocol version a masternode must advertise to coordinate
/// mixing sessions.
pub const MIN_PROTOCOL_VERSION: u32 = 70216;

/// Protocol failures before a masternode is skipped during selection.
const DEPRIORITIZE_THRESHOLD: u32 = 2;

/// One entry of the masternode list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasternodeEntry {
    /// Registration transaction hash identifying the masternode.
    pub pro_tx_hash: Txid,

    /// Network address of the masternode.
    pub address: SocketAddr,

    /// Advertised protocol version.
    pub protocol_version: u32,

    /// Whether the masternode reports itself synced.
    pub synced: bool,
}

impl MasternodeEntry {
    /// Whether this entry can coordinate a mixing session.
    pub fn is_compatible(&self) -> bool {
        self.synced && self.protocol_version >= MIN_PROTOCOL_VERSION
    }
}

/// Read access to the masternode list.
#[async_trait]
pub trait MasternodeDirectory: Send + Sync {
    /// Current masternode list entries.
    async fn entries(&self) -> Vec<MasternodeEntry>;

    /// Whether the list itself has finished syncing. Mixing refuses to start
    /// sessions while this is false.
    async fn is_synced(&self) -> bool;
}

/// Random masternode selection with penalty tracking.
///
/// Protocol errors add a penalty; entries at or above the threshold are
/// skipped unless nothing else is available. Transient errors do not
/// penalize, they only steer the next attempt to a different entry.
#[derive(Debug, Default)]
pub struct MasternodeSelector {
    penalties: HashMap<Txid, u32>,
}

impl MasternodeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a random compatible entry, avoiding `exclude` (the masternode
    /// that just failed) and penalized entries where possible.
    pub fn select(
        &self,
        entries: &[MasternodeEntry],
        exclude: Option<Txid>,
    ) -> Option<MasternodeEntry> {
        let compatible: Vec<&MasternodeEntry> = entries
            .iter()
            .filter(|e| e.is_compatible())
            .filter(|e| Some(e.pro_tx_hash) != exclude)
            .collect();

        let preferred: Vec<&MasternodeEntry> = compatible
            .iter()
            .copied()
            .filter(|e| self.penalty(e.pro_tx_hash) < DEPRIORITIZE_THRESHOLD)
            .collect();

        let pool = if preferred.is_empty() {
            &compatible
        } else {
            &preferred
        };
        pool.choose(&mut rand::thread_rng()).map(|e| (*e).clone())
    }

    /// Record a protocol failure against a masternode.
    pub fn deprioritize(&mut self, pro_tx_hash: Txid) {
        *self.penalties.entry(pro_tx_hash).or_insert(0) += 1;
    }

    /// Clear penalties after a successful session with this masternode.
    pub fn note_success(&mut self, pro_tx_hash: Txid) {
        self.penalties.remove(&pro_tx_hash);
    }

    fn penalty(&self, pro_tx_hash: Txid) -> u32 {
        self.penalties.get(&pro_tx_hash).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashcore::hashes::Hash;

    fn entry(n: u8, synced: bool, version: u32) -> MasternodeEntry {
        MasternodeEntry {
            pro_tx_hash: Txid::from_byte_array([n; 32]),
            address: format!("127.0.0.1:{}", 19000 + n as u16).parse().unwrap(),
            protocol_version: version,
            synced,
        }
    }

    #[test]
    fn skips_incompatible_entries() {
        let selector = MasternodeSelector::new();
        let entries = vec![
            entry(1, false, MIN_PROTOCOL_VERSION),
            entry(2, true, MIN_PROTOCOL_VERSION - 1),
        ];
        assert!(selector.select(&entries, None).is_none());
    }

    #[test]
    fn excludes_previous_failure() {
        let selector = MasternodeSelector::new();
        let entries = vec![
            entry(1, true, MIN_PROTOCOL_VERSION),
            entry(2, true, MIN_PROTOCOL_VERSION),
        ];
        let picked = selector
            .select(&entries, Some(entries[0].pro_tx_hash))
            .unwrap();
        assert_eq!(picked.pro_tx_hash, entries[1].pro_tx_hash);
    }

    #[test]
    fn penalized_entries_are_last_resort() {
        let mut selector = MasternodeSelector::new();
        let entries = vec![
            entry(1, true, MIN_PROTOCOL_VERSION),
            entry(2, true, MIN_PROTOCOL_VERSION),
        ];
        selector.deprioritize(entries[0].pro_tx_hash);
        selector.deprioritize(entries[0].pro_tx_hash);
        for _ in 0..16 {
            let picked = selector.select(&entries, None).unwrap();
            assert_eq!(picked.pro_tx_hash, entries[1].pro_tx_hash);
        }

        // With nothing else left, the penalized entry is still usable.
        let only = vec![entries[0].clone()];
        assert!(selector.select(&only, None).is_some());
    }
}
