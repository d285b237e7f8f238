//! Persistence layer for WeaveChain
//!
//! Blocks, transactions, wallet lists, hash lists and encrypted blocks live
//! in sibling directories under the data directory, one JSON file per
//! content hash:
//!
//! ```text
//! <data_dir>/blocks/<indep_hash>.json
//! <data_dir>/blocks/invalid/<indep_hash>.json
//! <data_dir>/txs/<id>.json
//! <data_dir>/encrypted_blocks/<indep_hash>.json
//! <data_dir>/wallet_lists/<hash>.json
//! <data_dir>/hash_lists/<hash>.json
//! ```
//!
//! Reads never fail for expected conditions: a missing or malformed file is
//! `None`. Blocks whose wallet list cannot be loaded are moved to
//! `blocks/invalid/`.

pub mod disk;
pub mod index;
pub mod store;

pub use disk::{dir_size, spawn_disk_monitor, DiskSpace};
pub use index::Database;
pub use store::{ContentStore, FileStore, InMemoryStore, WalletListStore};

use crate::blockchain::{block_hash_at_height, Block, FullBlock, WalletList, WalletListRef};
use crate::config::StorageConfig;
use crate::crypto;
use crate::encoding::{b64, BlockHash, TxId};
use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not enough disk space: need {needed} bytes, {available} available")]
    NotEnoughSpace { needed: u64, available: u64 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("index lock poisoned")]
    Poisoned,
}

impl From<StorageError> for ChainError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotEnoughSpace { needed, available } => {
                ChainError::NotEnoughDiskSpace { needed, available }
            }
            StorageError::Io(e) => ChainError::IoError(e.to_string()),
            StorageError::Serialization(e) => ChainError::SerializationError(e.to_string()),
            StorageError::Database(e) => ChainError::DatabaseError(e.to_string()),
            StorageError::Poisoned => ChainError::DatabaseError("index lock poisoned".to_string()),
        }
    }
}

/// Decides which transaction bodies of a full block get stored.
pub trait TxFilter: Send + Sync {
    fn accept(&self, tx: &Transaction) -> bool;
}

/// Stores every transaction.
pub struct AcceptAll;

impl TxFilter for AcceptAll {
    fn accept(&self, _tx: &Transaction) -> bool {
        true
    }
}

#[derive(Serialize, Deserialize)]
struct EncryptedBlock {
    #[serde(with = "b64")]
    data: Vec<u8>,
}

pub struct Storage {
    root: PathBuf,
    disk: Arc<DiskSpace>,
    blocks: FileStore,
    invalid_blocks: PathBuf,
    txs: FileStore,
    encrypted_blocks: FileStore,
    wallet_lists: WalletListStore,
    hash_lists: FileStore,
    index: Option<Database>,
}

impl Storage {
    /// Create the directory layout under `config.data_dir` and probe the
    /// disk budget.
    pub fn open(config: &StorageConfig) -> Result<Self, ChainError> {
        let root = config.data_dir.clone();
        fs::create_dir_all(&root)?;
        let disk = Arc::new(DiskSpace::probe(&root, config.disk_space)?);
        let index = if config.index {
            Some(Database::open(&root.join("index.db"))?)
        } else {
            None
        };
        Self::open_with(root, disk, index)
    }

    pub fn open_with(
        root: PathBuf,
        disk: Arc<DiskSpace>,
        index: Option<Database>,
    ) -> Result<Self, ChainError> {
        let blocks = FileStore::open(root.join("blocks"))?.with_admission(Arc::clone(&disk));
        let invalid_blocks = root.join("blocks").join("invalid");
        fs::create_dir_all(&invalid_blocks)?;
        let txs = FileStore::open(root.join("txs"))?.with_admission(Arc::clone(&disk));
        let encrypted_blocks = FileStore::open(root.join("encrypted_blocks"))?;
        let wallet_lists =
            WalletListStore::new(Arc::new(FileStore::open(root.join("wallet_lists"))?));
        let hash_lists = FileStore::open(root.join("hash_lists"))?;

        info!(
            data_dir = %root.display(),
            capacity = disk.capacity(),
            used = disk.used(),
            blocks = disk.blocks_on_disk(),
            "Opened storage"
        );
        Ok(Storage {
            root,
            disk,
            blocks,
            invalid_blocks,
            txs,
            encrypted_blocks,
            wallet_lists,
            hash_lists,
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn disk(&self) -> &Arc<DiskSpace> {
        &self.disk
    }

    pub fn index(&self) -> Option<&Database> {
        self.index.as_ref()
    }

    // Blocks

    pub fn block_path(&self, hash: &BlockHash) -> PathBuf {
        self.blocks.path(&hash.to_b64())
    }

    /// Persist `block`, moving an inline wallet list into the wallet-list
    /// store and keeping only its hash in the block file. A block already on
    /// disk is left as is.
    pub fn write_block(&self, block: &Block) -> Result<(), ChainError> {
        let key = block.indep_hash.to_b64();
        if self.blocks.contains(&key) {
            debug!(block = %block.indep_hash, "Block already stored");
            return Ok(());
        }
        let mut shadow = block.clone();
        if let WalletListRef::Inline(list) = &block.wallet_list {
            shadow.wallet_list = WalletListRef::Hash(self.wallet_lists.write(list)?);
        }
        let bytes = serde_json::to_vec(&shadow)?;
        self.blocks.put(&key, &bytes)?;
        self.disk.block_written();
        debug!(block = %block.indep_hash, height = block.height, "Wrote block");
        Ok(())
    }

    /// Store the accepted transaction bodies, the block shadow and the
    /// index rows. Returns the ids of the stored transactions.
    pub fn write_full_block(
        &self,
        full: &FullBlock,
        filter: &dyn TxFilter,
    ) -> Result<Vec<TxId>, ChainError> {
        let accepted: Vec<Transaction> = full
            .txs
            .iter()
            .filter(|tx| {
                let ok = filter.accept(tx);
                if !ok {
                    warn!(
                        tx = %tx.id,
                        block = %full.block.indep_hash,
                        "Transaction rejected by filter"
                    );
                }
                ok
            })
            .cloned()
            .collect();
        for tx in &accepted {
            self.write_tx(tx)?;
        }
        self.write_block(&full.block)?;
        if let Some(index) = &self.index {
            index.insert_block(&full.block, &accepted)?;
        }
        Ok(accepted.iter().map(|tx| tx.id).collect())
    }

    /// Read a block with its wallet list inline.
    pub fn read_block(&self, hash: &BlockHash) -> Option<Block> {
        let key = hash.to_b64();
        let bytes = match self.blocks.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(block = %hash, error = %e, "Failed to read block");
                return None;
            }
        };
        let mut block: Block = match serde_json::from_slice(&bytes) {
            Ok(block) => block,
            Err(e) => {
                warn!(block = %hash, error = %e, "Malformed block file");
                self.quarantine(hash);
                return None;
            }
        };
        if let WalletListRef::Hash(list_hash) = block.wallet_list {
            match self.wallet_lists.read(&list_hash) {
                Some(list) => block.wallet_list = WalletListRef::Inline((*list).clone()),
                None => {
                    warn!(block = %hash, wallet_list = %list_hash, "Wallet list unavailable");
                    self.quarantine(hash);
                    return None;
                }
            }
        }
        Some(block)
    }

    /// Block at `height` of a newest-first hash list.
    pub fn read_block_by_height(&self, height: u64, hash_list: &[BlockHash]) -> Option<Block> {
        block_hash_at_height(hash_list, height).and_then(|hash| self.read_block(hash))
    }

    /// One result per requested hash, in order.
    pub fn read_blocks(&self, hashes: &[BlockHash]) -> Vec<Option<Block>> {
        hashes.iter().map(|hash| self.read_block(hash)).collect()
    }

    /// Move a block file into `blocks/invalid/`. Returns false if there was
    /// no such block.
    pub fn invalidate_block(&self, hash: &BlockHash) -> Result<bool, ChainError> {
        let from = self.block_path(hash);
        let size = match fs::metadata(&from) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let to = self.invalid_blocks.join(format!("{}.json", hash.to_b64()));
        fs::rename(&from, &to)?;
        self.disk.release(size);
        self.disk.block_removed();
        warn!(block = %hash, "Moved block to quarantine");
        Ok(true)
    }

    pub fn is_quarantined(&self, hash: &BlockHash) -> bool {
        self.invalid_blocks.join(format!("{}.json", hash.to_b64())).is_file()
    }

    fn quarantine(&self, hash: &BlockHash) {
        if let Err(e) = self.invalidate_block(hash) {
            warn!(block = %hash, error = %e, "Failed to quarantine block");
        }
    }

    // Transactions

    pub fn tx_path(&self, id: &TxId) -> PathBuf {
        self.txs.path(&id.to_b64())
    }

    pub fn write_tx(&self, tx: &Transaction) -> Result<(), ChainError> {
        let key = tx.id.to_b64();
        if self.txs.contains(&key) {
            return Ok(());
        }
        let bytes = serde_json::to_vec(tx)?;
        self.txs.put(&key, &bytes)?;
        Ok(())
    }

    pub fn read_tx(&self, id: &TxId) -> Option<Transaction> {
        match self.txs.get(&id.to_b64()) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(tx) => Some(tx),
                Err(e) => {
                    warn!(tx = %id, error = %e, "Malformed transaction file");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(tx = %id, error = %e, "Failed to read transaction");
                None
            }
        }
    }

    // Wallet lists

    pub fn write_wallet_list(&self, list: &WalletList) -> Result<BlockHash, ChainError> {
        Ok(self.wallet_lists.write(list)?)
    }

    pub fn read_wallet_list(&self, hash: &BlockHash) -> Option<Arc<WalletList>> {
        self.wallet_lists.read(hash)
    }

    // Hash lists

    /// Store a newest-first hash list under its content hash.
    pub fn write_hash_list(&self, hash_list: &[BlockHash]) -> Result<BlockHash, ChainError> {
        let hash = hash_list_hash(hash_list);
        let bytes = serde_json::to_vec(hash_list)?;
        self.hash_lists.put(&hash.to_b64(), &bytes)?;
        Ok(hash)
    }

    pub fn read_hash_list(&self, hash: &BlockHash) -> Option<Vec<BlockHash>> {
        let bytes = self.hash_lists.get(&hash.to_b64()).ok().flatten()?;
        match serde_json::from_slice::<Vec<BlockHash>>(&bytes) {
            Ok(list) if hash_list_hash(&list) == *hash => Some(list),
            Ok(_) => {
                warn!(hash_list = %hash, "Hash list does not match its hash");
                None
            }
            Err(e) => {
                warn!(hash_list = %hash, error = %e, "Malformed hash list");
                None
            }
        }
    }

    // Encrypted blocks

    pub fn write_encrypted_block(&self, hash: &BlockHash, data: &[u8]) -> Result<(), ChainError> {
        let bytes = serde_json::to_vec(&EncryptedBlock {
            data: data.to_vec(),
        })?;
        self.encrypted_blocks.put(&hash.to_b64(), &bytes)?;
        Ok(())
    }

    pub fn read_encrypted_block(&self, hash: &BlockHash) -> Option<Vec<u8>> {
        let bytes = self.encrypted_blocks.get(&hash.to_b64()).ok().flatten()?;
        serde_json::from_slice::<EncryptedBlock>(&bytes)
            .map(|block| block.data)
            .ok()
    }
}

fn hash_list_hash(hash_list: &[BlockHash]) -> BlockHash {
    let mut buf = Vec::with_capacity(hash_list.len() * BlockHash::LEN);
    for hash in hash_list {
        buf.extend_from_slice(hash.as_bytes());
    }
    crypto::sha384(&buf)
}
