//! Relay (masternode) queue client.
//!
//! Abstracts the coordination dialogue with one masternode: joining a queue,
//! submitting inputs and outputs, exchanging signatures, and broadcasting
//! transactions to the network. The actual wire protocol lives behind this
//! trait; the message types here mirror the conceptual protocol only
//! (join, queue status, entry, signing request, final transaction).
//!
//! All calls are awaited under a caller-side timeout by the session manager,
//! so implementations may block on network I/O.

use async_trait::async_trait;
use dashcore::{Transaction, TxIn, TxOut, Txid};

use crate::collateral::CollateralTx;
use crate::denominations::Denomination;
use crate::error::RelayResult;
use crate::masternode::MasternodeEntry;

/// Proof of queue membership, returned by a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTicket {
    /// Queue identifier assigned by the relay.
    pub queue_id: u64,

    /// Masternode holding the queue.
    pub masternode: Txid,

    /// Denomination this queue mixes.
    pub denomination: Denomination,
}

/// Relay-reported queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Participants currently waiting in the queue.
    pub participants: u32,

    /// Participants required before the session forms.
    pub required: u32,

    /// Whether the session has formed and entries may be submitted.
    pub ready: bool,
}

/// Our contribution to a formed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    /// Inputs we bring, unsigned.
    pub inputs: Vec<TxIn>,

    /// Denominated outputs we expect back, one per input.
    pub outputs: Vec<TxOut>,

    /// Collateral backing this entry against misbehavior.
    pub collateral: Transaction,
}

/// The relay's request that participants sign the assembled transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    /// The joint transaction with all participants' inputs and outputs.
    pub unsigned_tx: Transaction,
}

/// Client side of the mixing coordination protocol.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Join (or create) a queue for `denomination` on the given masternode,
    /// presenting collateral as the anti-spam commitment.
    async fn join(
        &self,
        masternode: &MasternodeEntry,
        denomination: Denomination,
        collateral: &CollateralTx,
    ) -> RelayResult<QueueTicket>;

    /// Poll queue occupancy until the session forms.
    async fn poll_queue(&self, ticket: &QueueTicket) -> RelayResult<QueueStatus>;

    /// Submit our inputs and outputs to the formed session.
    async fn submit_entry(&self, ticket: &QueueTicket, entry: SessionEntry) -> RelayResult<()>;

    /// Poll for the relay's signing request once all entries are collected.
    async fn poll_signing_request(
        &self,
        ticket: &QueueTicket,
    ) -> RelayResult<Option<SigningRequest>>;

    /// Submit our signed inputs of the joint transaction.
    async fn submit_signatures(
        &self,
        ticket: &QueueTicket,
        signatures: Vec<TxIn>,
    ) -> RelayResult<()>;

    /// Poll for the broadcast of the fully signed joint transaction.
    async fn poll_final(&self, ticket: &QueueTicket) -> RelayResult<Option<Txid>>;

    /// Relay an independent transaction (collateral, create-denominations)
    /// to the network.
    async fn broadcast_transaction(&self, tx: &Transaction) -> RelayResult<Txid>;
}
