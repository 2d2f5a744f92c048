//! In-memory mocks of the external collaborators, for tests and examples.

mod directory;
mod relay;
mod wallet;

pub use directory::{StaticBackup, StaticMasternodeDirectory};
pub use relay::{MockRelay, SigningBehavior};
pub use wallet::MockWallet;
