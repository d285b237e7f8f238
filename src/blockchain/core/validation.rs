//! Checks made by the callers of the transaction validator: anchor freshness
//! against recent blocks and per-sender ordering inside a block.
use crate::blockchain::core::state::WalletList;
use crate::encoding::{Address, BlockHash};
use crate::transaction::{Transaction, TxValidator};
use std::collections::HashSet;
use std::fmt;

/// Hashes of the most recent blocks, newest first. A block-anchored
/// transaction is fresh while its anchor is in this window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAnchors {
    hashes: Vec<BlockHash>,
    max_depth: usize,
}

impl BlockAnchors {
    pub fn new(max_depth: usize) -> Self {
        BlockAnchors {
            hashes: Vec::with_capacity(max_depth),
            max_depth,
        }
    }

    /// Window over the head of a newest-first hash list.
    pub fn from_hash_list(hash_list: &[BlockHash], max_depth: usize) -> Self {
        BlockAnchors {
            hashes: hash_list.iter().take(max_depth).copied().collect(),
            max_depth,
        }
    }

    /// Record a new head block, dropping the oldest anchor past the depth.
    pub fn push(&mut self, hash: BlockHash) {
        self.hashes.insert(0, hash);
        self.hashes.truncate(self.max_depth);
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn hashes(&self) -> &[BlockHash] {
        &self.hashes
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorError {
    /// Block anchor is older than the window, or unknown.
    Stale,
    /// Ledger anchor differs from the sender's last transaction.
    Mismatch,
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AnchorError::Stale => write!(f, "anchor is not a recent block"),
            AnchorError::Mismatch => write!(f, "anchor is not the sender's last transaction"),
        }
    }
}

pub fn verify_anchor(
    tx: &Transaction,
    ledger: &WalletList,
    anchors: &BlockAnchors,
) -> Result<(), AnchorError> {
    if tx.is_block_anchored() {
        let fresh = BlockHash::from_slice(&tx.last_tx).is_some_and(|hash| anchors.contains(&hash));
        return if fresh { Ok(()) } else { Err(AnchorError::Stale) };
    }
    if tx.last_tx.as_slice() != ledger.last_tx(&tx.owner_address()) {
        return Err(AnchorError::Mismatch);
    }
    Ok(())
}

/// Keep at most one ledger-anchored transaction per sender, and only one
/// whose anchor is the sender's current last transaction. Block-anchored
/// transactions pass through. Input order is preserved.
pub fn filter_out_of_order(ledger: &WalletList, txs: &[Transaction]) -> Vec<Transaction> {
    let mut seen: HashSet<Address> = HashSet::new();
    txs.iter()
        .filter(|tx| {
            if tx.is_block_anchored() {
                return true;
            }
            let sender = tx.owner_address();
            if seen.contains(&sender) || tx.last_tx.as_slice() != ledger.last_tx(&sender) {
                return false;
            }
            seen.insert(sender);
            true
        })
        .cloned()
        .collect()
}

/// Largest order-preserving selection of `txs` that forms a valid block
/// body on top of `ledger`.
pub fn pick_txs_to_mine(
    validator: &TxValidator,
    ledger: &WalletList,
    anchors: &BlockAnchors,
    txs: &[Transaction],
    diff: u32,
    height: u64,
    timestamp: u64,
) -> Vec<Transaction> {
    let params = validator.params();
    let mut picked = Vec::new();
    let mut data_size = 0usize;
    let mut state = ledger.clone();

    for tx in filter_out_of_order(ledger, txs) {
        if picked.len() >= params.block_tx_count_limit {
            break;
        }
        if data_size + tx.data_size() > params.block_tx_data_size_limit {
            continue;
        }
        if tx.is_block_anchored() && verify_anchor(&tx, &state, anchors).is_err() {
            continue;
        }
        if validator.verify(&tx, diff, height, &state, timestamp).is_err() {
            continue;
        }
        data_size += tx.data_size();
        state = state.apply_transaction(&tx);
        picked.push(tx);
    }
    picked
}
