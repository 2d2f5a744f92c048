//! Static masternode directory and backup subsystem mocks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use dashcore::Txid;
use dashcore::hashes::Hash;

use crate::error::WalletResult;
use crate::masternode::{MIN_PROTOCOL_VERSION, MasternodeDirectory, MasternodeEntry};
use crate::wallet::BackupProvider;

/// A fixed masternode list with a toggleable sync flag.
#[derive(Debug)]
pub struct StaticMasternodeDirectory {
    entries: Vec<MasternodeEntry>,
    synced: AtomicBool,
}

impl StaticMasternodeDirectory {
    /// A synced directory with `count` compatible masternodes.
    pub fn with_nodes(count: u8) -> Self {
        let entries = (1..=count)
            .map(|n| MasternodeEntry {
                pro_tx_hash: Txid::from_byte_array([0xa0 + n; 32]),
                address: format!("127.0.0.1:{}", 19000 + n as u16).parse().unwrap(),
                protocol_version: MIN_PROTOCOL_VERSION,
                synced: true,
            })
            .collect();
        StaticMasternodeDirectory {
            entries,
            synced: AtomicBool::new(true),
        }
    }

    /// An empty, synced directory.
    pub fn empty() -> Self {
        Self::with_nodes(0)
    }

    /// Flip the sync flag.
    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }
}

#[async_trait]
impl MasternodeDirectory for StaticMasternodeDirectory {
    async fn entries(&self) -> Vec<MasternodeEntry> {
        self.entries.clone()
    }

    async fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// A backup subsystem whose enabled flag can be toggled from tests.
#[derive(Debug)]
pub struct StaticBackup {
    enabled: AtomicBool,
    backups_taken: AtomicU32,
}

impl StaticBackup {
    pub fn enabled() -> Self {
        StaticBackup {
            enabled: AtomicBool::new(true),
            backups_taken: AtomicU32::new(0),
        }
    }

    pub fn disabled() -> Self {
        StaticBackup {
            enabled: AtomicBool::new(false),
            backups_taken: AtomicU32::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Backups requested through [`BackupProvider::trigger_backup`].
    pub fn backups_taken(&self) -> u32 {
        self.backups_taken.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackupProvider for StaticBackup {
    async fn automatic_backups_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn trigger_backup(&self) -> WalletResult<()> {
        self.backups_taken.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
