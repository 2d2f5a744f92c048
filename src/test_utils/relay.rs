//! Scriptable relay mock.
//!
//! Defaults to a fully cooperative masternode: the queue forms on the first
//! poll, the signing request arrives on the first poll after entry
//! submission, and the final transaction broadcasts immediately. Behaviors
//! can be overridden per phase to exercise failure paths.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashcore::hashes::Hash;
use dashcore::{Transaction, TxIn, Txid};
use tokio::sync::Mutex;

use crate::collateral::CollateralTx;
use crate::denominations::Denomination;
use crate::error::{RelayError, RelayResult};
use crate::masternode::MasternodeEntry;
use crate::relay::{QueueStatus, QueueTicket, RelayClient, SessionEntry, SigningRequest};

/// How the mock answers signing-request polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningBehavior {
    /// Produce a well-formed joint transaction containing our entry.
    Cooperative,
    /// Never produce a signing request (forces a timeout).
    Never,
    /// Produce a transaction that omits our outputs (protocol violation).
    Malformed,
}

#[derive(Debug)]
struct RelayState {
    join_errors: VecDeque<RelayError>,
    queue_polls_before_ready: u32,
    signing: SigningBehavior,
    next_queue_id: u64,
    entries: HashMap<u64, SessionEntry>,
    signatures: HashMap<u64, Vec<TxIn>>,
    broadcasts: Vec<Transaction>,
    joins: u32,
}

/// In-memory [`RelayClient`] with scriptable behavior.
#[derive(Debug)]
pub struct MockRelay {
    participants_required: u32,
    state: Mutex<RelayState>,
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::cooperative()
    }
}

impl MockRelay {
    /// A relay that completes a session without any friction.
    pub fn cooperative() -> Self {
        MockRelay {
            participants_required: 3,
            state: Mutex::new(RelayState {
                join_errors: VecDeque::new(),
                queue_polls_before_ready: 0,
                signing: SigningBehavior::Cooperative,
                next_queue_id: 0,
                entries: HashMap::new(),
                signatures: HashMap::new(),
                broadcasts: Vec::new(),
                joins: 0,
            }),
        }
    }

    /// Queue the given errors for successive join attempts.
    pub async fn fail_joins_with(&self, errors: Vec<RelayError>) {
        self.state.lock().await.join_errors = errors.into();
    }

    /// Require this many queue polls before the session forms.
    pub async fn set_queue_polls_before_ready(&self, polls: u32) {
        self.state.lock().await.queue_polls_before_ready = polls;
    }

    /// Override the signing behavior.
    pub async fn set_signing_behavior(&self, behavior: SigningBehavior) {
        self.state.lock().await.signing = behavior;
    }

    /// Join attempts observed so far.
    pub async fn join_count(&self) -> u32 {
        self.state.lock().await.joins
    }

    /// Transactions broadcast through this relay.
    pub async fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().await.broadcasts.clone()
    }

    /// Entries submitted to formed sessions, in queue order.
    pub async fn submitted_entries(&self) -> Vec<SessionEntry> {
        let state = self.state.lock().await;
        let mut ids: Vec<u64> = state.entries.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| state.entries.get(&id).cloned()).collect()
    }
}

#[async_trait]
impl RelayClient for MockRelay {
    async fn join(
        &self,
        masternode: &MasternodeEntry,
        denomination: Denomination,
        _collateral: &CollateralTx,
    ) -> RelayResult<QueueTicket> {
        let mut state = self.state.lock().await;
        state.joins += 1;
        if let Some(error) = state.join_errors.pop_front() {
            return Err(error);
        }
        state.next_queue_id += 1;
        Ok(QueueTicket {
            queue_id: state.next_queue_id,
            masternode: masternode.pro_tx_hash,
            denomination,
        })
    }

    async fn poll_queue(&self, _ticket: &QueueTicket) -> RelayResult<QueueStatus> {
        let mut state = self.state.lock().await;
        if state.queue_polls_before_ready > 0 {
            state.queue_polls_before_ready -= 1;
            return Ok(QueueStatus {
                participants: self.participants_required - 1,
                required: self.participants_required,
                ready: false,
            });
        }
        Ok(QueueStatus {
            participants: self.participants_required,
            required: self.participants_required,
            ready: true,
        })
    }

    async fn submit_entry(&self, ticket: &QueueTicket, entry: SessionEntry) -> RelayResult<()> {
        self.state.lock().await.entries.insert(ticket.queue_id, entry);
        Ok(())
    }

    async fn poll_signing_request(
        &self,
        ticket: &QueueTicket,
    ) -> RelayResult<Option<SigningRequest>> {
        let state = self.state.lock().await;
        match state.signing {
            SigningBehavior::Never => Ok(None),
            SigningBehavior::Malformed => Ok(Some(SigningRequest {
                unsigned_tx: Transaction {
                    version: 2,
                    lock_time: 0,
                    input: vec![],
                    output: vec![],
                    special_transaction_payload: None,
                },
            })),
            SigningBehavior::Cooperative => {
                let Some(entry) = state.entries.get(&ticket.queue_id) else {
                    return Ok(None);
                };
                Ok(Some(SigningRequest {
                    unsigned_tx: Transaction {
                        version: 2,
                        lock_time: 0,
                        input: entry.inputs.clone(),
                        output: entry.outputs.clone(),
                        special_transaction_payload: None,
                    },
                }))
            }
        }
    }

    async fn submit_signatures(
        &self,
        ticket: &QueueTicket,
        signatures: Vec<TxIn>,
    ) -> RelayResult<()> {
        self.state.lock().await.signatures.insert(ticket.queue_id, signatures);
        Ok(())
    }

    async fn poll_final(&self, ticket: &QueueTicket) -> RelayResult<Option<Txid>> {
        let state = self.state.lock().await;
        if state.signatures.contains_key(&ticket.queue_id) {
            Ok(Some(Txid::from_byte_array([0xfe; 32])))
        } else {
            Ok(None)
        }
    }

    async fn broadcast_transaction(&self, tx: &Transaction) -> RelayResult<Txid> {
        let mut state = self.state.lock().await;
        state.broadcasts.push(tx.clone());
        Ok(tx.txid())
    }
}
