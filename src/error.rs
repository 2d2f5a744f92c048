//! Error types for the CoinJoin mixing engine.

use std::io;
use thiserror::Error;

use crate::denominations::Denomination;

/// Main error type for the CoinJoin client.
#[derive(Debug, Error)]
pub enum CoinJoinError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Denomination error: {0}")]
    Denomination(#[from] DenominationError),

    #[error("Collateral error: {0}")]
    Collateral(#[from] CollateralError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised when starting or driving a mixing session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A session for this denomination is already active.
    #[error("Already mixing denomination {0}")]
    AlreadyMixing(Denomination),

    /// No unlocked, denominated inputs below the round target exist.
    #[error("No compatible inputs for denomination {0}")]
    NoCompatibleInputs(Denomination),

    /// The configured bound on concurrently active sessions is reached.
    #[error("Maximum of {0} concurrent sessions reached")]
    MaxSessionsReached(usize),

    /// The masternode list has not finished syncing.
    #[error("Masternode list sync in progress")]
    SyncInProgress,

    /// No compatible masternode could be selected.
    #[error("No masternodes available")]
    NoMasternodesAvailable,

    /// Mixing is blocked until the wallet resolves a resource problem.
    #[error("Mixing disabled: {0}")]
    MixingDisabled(MixingBlocked),

    /// The referenced session does not exist (already terminal and reaped).
    #[error("Unknown session {0}")]
    UnknownSession(u64),

    /// The wallet collaborator failed. Distinct from having nothing to mix:
    /// this does not mean funds are exhausted.
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// Hard-stop conditions enforced by the backup guard.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MixingBlocked {
    #[error("automatic backups are disabled")]
    BackupsDisabled,

    #[error("keypool depleted ({keys_left} keys left, {required} required)")]
    KeypoolDepleted { keys_left: u32, required: u32 },
}

/// Denomination engine errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DenominationError {
    /// Funds do not cover a single denomination output plus fees.
    #[error("Insufficient funds: {available} duffs available, {required} duffs required")]
    InsufficientFunds { available: u64, required: u64 },

    /// The configured denomination set failed validation.
    #[error("Invalid denomination set: {0}")]
    InvalidSet(String),
}

/// Collateral creation and validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollateralError {
    #[error("Collateral transaction has {0} inputs, expected exactly 1")]
    WrongInputCount(usize),

    #[error("Collateral transaction has {0} outputs, expected 1 or 2")]
    WrongOutputCount(usize),

    #[error("Collateral value {value} duffs outside accepted range [{min}, {max}]")]
    ValueOutOfRange { value: u64, min: u64, max: u64 },

    #[error("Collateral output of {0} duffs is below the dust limit")]
    DustOutput(u64),

    #[error("Not enough confirmed funds for collateral")]
    InsufficientFunds,
}

/// Errors returned by a relay (masternode) during queue coordination.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Not in the masternode list")]
    NotInMasternodeList,

    #[error("Incompatible protocol version {0}")]
    IncompatibleVersion(u32),

    #[error("Masternode is not synced")]
    NotSynced,

    #[error("Queue is full")]
    QueueFull,

    #[error("Session entries are full")]
    EntriesFull,

    #[error("Entry exceeds maximum size")]
    EntryTooLarge,

    #[error("Relay already has one of the submitted inputs")]
    AlreadyHaveInput,

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Relay timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RelayError {
    /// Transient errors are retried against a different masternode with
    /// backoff; everything else terminates the session immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::QueueFull
                | RelayError::Timeout
                | RelayError::ConnectionFailed(_)
                | RelayError::NotSynced
        )
    }
}

/// Wallet collaborator errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Keypool exhausted")]
    KeypoolExhausted,

    #[error("Input {0} is already locked")]
    InputLocked(String),

    #[error("Wallet unavailable: {0}")]
    Unavailable(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    #[error("Backup failed: {0}")]
    Backup(String),
}

/// Result alias using [`CoinJoinError`].
pub type Result<T> = std::result::Result<T, CoinJoinError>;

/// Result alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Result alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Result alias for wallet operations.
pub type WalletResult<T> = std::result::Result<T, WalletError>;

/// Result alias for denomination planning.
pub type DenominationResult<T> = std::result::Result<T, DenominationError>;

/// Result alias for collateral handling.
pub type CollateralResult<T> = std::result::Result<T, CollateralError>;

/// Logging-related errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Subscriber initialization failed: {0}")]
    SubscriberInit(String),
}

/// Result alias for logging setup.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;
