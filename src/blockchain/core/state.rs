use crate::consensus::{self, Winston};
use crate::crypto;
use crate::encoding::{b64, winston, Address, BlockHash};
use crate::transaction::Transaction;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// One account in a ledger snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub address: Address,
    #[serde(with = "winston")]
    pub balance: Winston,
    /// Id of the last transaction sent from this wallet; empty if none.
    #[serde(with = "b64")]
    pub last_tx: Vec<u8>,
}

impl WalletEntry {
    pub fn new(address: Address, balance: Winston) -> Self {
        WalletEntry {
            address,
            balance,
            last_tx: Vec::new(),
        }
    }

    /// Zero balance and no transaction history.
    pub fn is_empty_and_new(&self) -> bool {
        self.balance == 0 && self.last_tx.is_empty()
    }
}

/// Ledger snapshot: address -> wallet entry.
///
/// Applying a transaction returns a new snapshot; the receiver is never
/// modified, so readers holding an older snapshot stay consistent. On the
/// wire it is a list of entries ordered by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletList {
    wallets: BTreeMap<Address, WalletEntry>,
}

impl WalletList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = WalletEntry>) -> Self {
        WalletList {
            wallets: entries.into_iter().map(|e| (e.address, e)).collect(),
        }
    }

    pub fn get_wallet(&self, address: &Address) -> Option<&WalletEntry> {
        self.wallets.get(address)
    }

    pub fn balance(&self, address: &Address) -> Winston {
        self.wallets.get(address).map_or(0, |w| w.balance)
    }

    pub fn last_tx(&self, address: &Address) -> &[u8] {
        self.wallets
            .get(address)
            .map_or(&[][..], |w| w.last_tx.as_slice())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.wallets.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = &WalletEntry> {
        self.wallets.values()
    }

    /// Debit `reward + quantity` from the sender, move its last-tx reference
    /// to this transaction and credit `quantity` to the target.
    ///
    /// Never fails: an overspend shows up as a negative balance, which the
    /// validator rejects. Balances saturate at the bounds of a Winston.
    pub fn apply_transaction(&self, tx: &Transaction) -> WalletList {
        let mut next = self.clone();
        next.apply_in_place(tx);
        next
    }

    pub fn apply_transactions<'a>(
        &self,
        txs: impl IntoIterator<Item = &'a Transaction>,
    ) -> WalletList {
        let mut next = self.clone();
        for tx in txs {
            next.apply_in_place(tx);
        }
        next
    }

    /// Credit the block reward plus all fees of `txs` to `reward_addr`.
    /// Unclaimed blocks leave the ledger untouched.
    pub fn apply_mining_reward(
        &self,
        reward_addr: Option<Address>,
        txs: &[Transaction],
        height: u64,
    ) -> WalletList {
        let Some(addr) = reward_addr else {
            return self.clone();
        };
        let fees = txs
            .iter()
            .fold(0 as Winston, |acc, tx| acc.saturating_add(tx.reward));
        let mut next = self.clone();
        let entry = next
            .wallets
            .entry(addr)
            .or_insert_with(|| WalletEntry::new(addr, 0));
        entry.balance = entry
            .balance
            .saturating_add(consensus::block_reward(height).saturating_add(fees));
        next
    }

    /// Content hash over the canonical address-ordered encoding.
    pub fn hash(&self) -> BlockHash {
        let mut buf = Vec::with_capacity(self.wallets.len() * 96);
        for entry in self.wallets.values() {
            buf.extend_from_slice(entry.address.as_bytes());
            let balance = entry.balance.to_string();
            buf.extend_from_slice(&(balance.len() as u32).to_be_bytes());
            buf.extend_from_slice(balance.as_bytes());
            buf.extend_from_slice(&(entry.last_tx.len() as u32).to_be_bytes());
            buf.extend_from_slice(&entry.last_tx);
        }
        crypto::sha384(&buf)
    }

    fn apply_in_place(&mut self, tx: &Transaction) {
        let sender = tx.owner_address();
        let entry = self
            .wallets
            .entry(sender)
            .or_insert_with(|| WalletEntry::new(sender, 0));
        let cost = tx.reward.saturating_add(tx.quantity);
        entry.balance = entry.balance.saturating_sub(cost);
        entry.last_tx = tx.id.0.to_vec();

        if tx.quantity > 0 {
            if let Some(target) = tx.target_address() {
                let entry = self
                    .wallets
                    .entry(target)
                    .or_insert_with(|| WalletEntry::new(target, 0));
                entry.balance = entry.balance.saturating_add(tx.quantity);
            }
        }
    }
}

impl Serialize for WalletList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.wallets.values())
    }
}

impl<'de> Deserialize<'de> for WalletList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<WalletEntry>::deserialize(deserializer)?;
        Ok(WalletList::from_entries(entries))
    }
}

impl FromIterator<WalletEntry> for WalletList {
    fn from_iter<I: IntoIterator<Item = WalletEntry>>(iter: I) -> Self {
        WalletList::from_entries(iter)
    }
}
