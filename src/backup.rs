//! Backup guard gating mixing on fresh key material.
//!
//! Each completed session consumes keypool addresses for the mixed outputs.
//! To avoid exhausting the pool and forcing address reuse, new sessions are
//! refused when automatic backups are off or the keypool falls below a hard
//! low-water mark. A softer warning mark triggers a backup request while
//! mixing continues.

use tracing::warn;

use crate::error::MixingBlocked;
use crate::wallet::{BackupProvider, WalletStore};

/// Keypool size below which mixing stops entirely.
pub const KEYS_STOP_THRESHOLD: u32 = 50;

/// Keypool size below which a fresh backup is requested.
pub const KEYS_WARNING_THRESHOLD: u32 = 100;

/// Gate on backup availability and keypool depth.
#[derive(Debug, Clone)]
pub struct BackupGuard {
    stop_threshold: u32,
    warning_threshold: u32,
}

impl Default for BackupGuard {
    fn default() -> Self {
        BackupGuard {
            stop_threshold: KEYS_STOP_THRESHOLD,
            warning_threshold: KEYS_WARNING_THRESHOLD,
        }
    }
}

impl BackupGuard {
    pub fn new(stop_threshold: u32, warning_threshold: u32) -> Self {
        BackupGuard {
            stop_threshold,
            warning_threshold: warning_threshold.max(stop_threshold),
        }
    }

    /// Check whether new sessions may start.
    ///
    /// A failure here is a hard stop surfaced to the user; it is never
    /// retried automatically.
    pub async fn check<W: WalletStore, B: BackupProvider>(
        &self,
        wallet: &W,
        backup: &B,
    ) -> Result<(), MixingBlocked> {
        if !backup.automatic_backups_enabled().await {
            return Err(MixingBlocked::BackupsDisabled);
        }

        let keys_left = wallet.keys_left().await;
        if keys_left < self.stop_threshold {
            return Err(MixingBlocked::KeypoolDepleted {
                keys_left,
                required: self.stop_threshold,
            });
        }

        if keys_left < self.warning_threshold {
            warn!(
                keys_left,
                threshold = self.warning_threshold,
                "keypool running low, requesting wallet backup"
            );
            if let Err(e) = backup.trigger_backup().await {
                warn!("backup request failed: {}", e);
            }
        }

        Ok(())
    }

    /// Convenience predicate over [`BackupGuard::check`].
    pub async fn can_mix<W: WalletStore, B: BackupProvider>(
        &self,
        wallet: &W,
        backup: &B,
    ) -> bool {
        self.check(wallet, backup).await.is_ok()
    }
}
