//! Pending transactions waiting to be mined.
//!
//! Admission runs the full validator and then maps its verdict onto the
//! reason codes reported to API callers, picking the most specific one for
//! anchor problems.

use crate::blockchain::{verify_anchor, AnchorError, BlockAnchors, WalletList};
use crate::config::ProtocolParams;
use crate::consensus::Winston;
use crate::encoding::TxId;
use crate::persistence::Storage;
use crate::transaction::{InvalidReason, Transaction, TxValidator};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientFunds,
    BadAnchor,
    DataTooLarge,
    AlreadyInWeave,
    LastTxInMempool,
    MempoolFull,
    Invalid(Vec<InvalidReason>),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InsufficientFunds => "tx_insufficient_funds",
            RejectReason::BadAnchor => "tx_bad_anchor",
            RejectReason::DataTooLarge => "tx_data_too_large",
            RejectReason::AlreadyInWeave => "tx_already_in_weave",
            RejectReason::LastTxInMempool => "last_tx_in_mempool",
            RejectReason::MempoolFull => "mempool_is_full",
            RejectReason::Invalid(_) => "tx_invalid",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RejectReason::Invalid(reasons) => {
                let codes: Vec<&str> = reasons.iter().map(InvalidReason::code).collect();
                write!(f, "{}: {}", self.code(), codes.join(", "))
            }
            other => f.write_str(other.code()),
        }
    }
}

/// Answers whether a transaction is already part of the weave.
pub trait WeaveLookup {
    fn contains_tx(&self, id: &TxId) -> bool;
}

impl WeaveLookup for Storage {
    fn contains_tx(&self, id: &TxId) -> bool {
        self.tx_path(id).is_file()
    }
}

impl WeaveLookup for HashSet<TxId> {
    fn contains_tx(&self, id: &TxId) -> bool {
        self.contains(id)
    }
}

/// Chain state a transaction is admitted against.
pub struct ChainView<'a> {
    pub ledger: &'a WalletList,
    pub anchors: &'a BlockAnchors,
    pub diff: u32,
    /// Height of the block the transaction would be mined in.
    pub height: u64,
    pub timestamp: u64,
    pub weave: &'a dyn WeaveLookup,
}

pub struct Mempool {
    params: ProtocolParams,
    txs: Vec<Transaction>,
    ids: HashSet<TxId>,
    data_size: usize,
}

impl Mempool {
    pub fn new(params: ProtocolParams) -> Self {
        Mempool {
            params,
            txs: Vec::new(),
            ids: HashSet::new(),
            data_size: 0,
        }
    }

    /// Pending transactions in arrival order.
    pub fn txs(&self) -> &[Transaction] {
        &self.txs
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.ids.contains(id)
    }

    pub fn admit(
        &mut self,
        tx: Transaction,
        validator: &TxValidator,
        view: &ChainView<'_>,
    ) -> Result<(), RejectReason> {
        let result = self.check(&tx, validator, view);
        match &result {
            Ok(()) => {
                debug!(tx = %tx.id, data_size = tx.data_size(), "Admitted transaction");
                self.data_size += tx.data_size();
                self.ids.insert(tx.id);
                self.txs.push(tx);
            }
            Err(reason) => debug!(tx = %tx.id, reason = %reason, "Rejected transaction"),
        }
        result
    }

    fn check(
        &self,
        tx: &Transaction,
        validator: &TxValidator,
        view: &ChainView<'_>,
    ) -> Result<(), RejectReason> {
        if self.ids.contains(&tx.id) || view.weave.contains_tx(&tx.id) {
            return Err(RejectReason::AlreadyInWeave);
        }
        if tx.data_size() > self.params.tx_data_size_limit {
            return Err(RejectReason::DataTooLarge);
        }
        if self.data_size + tx.data_size() > self.params.mempool_data_size_limit {
            return Err(RejectReason::MempoolFull);
        }

        let sender = tx.owner_address();
        if !tx.is_block_anchored() && self.has_pending_ledger_anchored(tx) {
            return Err(RejectReason::LastTxInMempool);
        }
        match verify_anchor(tx, view.ledger, view.anchors) {
            Ok(()) => {}
            Err(AnchorError::Stale) => return Err(RejectReason::BadAnchor),
            Err(AnchorError::Mismatch) => {
                if self.ids.iter().any(|id| id.as_bytes() == tx.last_tx.as_slice()) {
                    return Err(RejectReason::LastTxInMempool);
                }
                return Err(RejectReason::BadAnchor);
            }
        }

        let pending = self
            .txs
            .iter()
            .filter(|p| p.owner_address() == sender)
            .map(Transaction::total_cost)
            .try_fold(0 as Winston, |acc, cost| acc.checked_add(cost?));
        let remaining = pending
            .and_then(|pending| pending.checked_add(tx.total_cost()?))
            .and_then(|committed| view.ledger.balance(&sender).checked_sub(committed));
        if !remaining.is_some_and(|left| left >= 0) {
            return Err(RejectReason::InsufficientFunds);
        }

        validator
            .verify(tx, view.diff, view.height, view.ledger, view.timestamp)
            .map_err(|reasons| {
                if reasons.contains(&InvalidReason::Overspend) {
                    RejectReason::InsufficientFunds
                } else if reasons.contains(&InvalidReason::LastTxNotValid) {
                    RejectReason::BadAnchor
                } else {
                    RejectReason::Invalid(reasons)
                }
            })
    }

    fn has_pending_ledger_anchored(&self, tx: &Transaction) -> bool {
        let sender = tx.owner_address();
        self.txs
            .iter()
            .any(|p| !p.is_block_anchored() && p.owner_address() == sender)
    }

    /// Drop transactions included in a block.
    pub fn remove_included(&mut self, ids: &[TxId]) {
        let included: HashSet<&TxId> = ids.iter().collect();
        self.retain(|tx| !included.contains(&tx.id));
    }

    /// Drop block-anchored transactions whose anchor left the window.
    pub fn drop_stale(&mut self, anchors: &BlockAnchors) {
        let before = self.txs.len();
        self.retain(|tx| {
            !tx.is_block_anchored()
                || crate::encoding::BlockHash::from_slice(&tx.last_tx)
                    .is_some_and(|hash| anchors.contains(&hash))
        });
        let dropped = before - self.txs.len();
        if dropped > 0 {
            info!(dropped, "Dropped transactions with stale anchors");
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&Transaction) -> bool) {
        let ids = &mut self.ids;
        let data_size = &mut self.data_size;
        self.txs.retain(|tx| {
            let kept = keep(tx);
            if !kept {
                ids.remove(&tx.id);
                *data_size -= tx.data_size();
            }
            kept
        });
    }
}
