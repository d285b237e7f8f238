//! SQLite index over persisted blocks and transactions.

use super::StorageError;
use crate::blockchain::Block;
use crate::crypto;
use crate::encoding::{BlockHash, TxId};
use crate::transaction::Transaction;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                indep_hash TEXT PRIMARY KEY,
                height INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                diff INTEGER NOT NULL,
                tx_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS blocks_height ON blocks(height);
            CREATE TABLE IF NOT EXISTS txs (
                id TEXT PRIMARY KEY,
                block_hash TEXT NOT NULL,
                owner_address TEXT NOT NULL,
                target TEXT NOT NULL,
                data_size INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tags (
                tx_id TEXT NOT NULL,
                name BLOB NOT NULL,
                value BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS tags_name_value ON tags(name, value);",
        )?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Record `block` and the transactions stored with it in one SQL
    /// transaction.
    pub fn insert_block(&self, block: &Block, txs: &[Transaction]) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let db_tx = conn.unchecked_transaction()?;
        let block_hash = block.indep_hash.to_b64();

        db_tx.execute(
            "INSERT OR REPLACE INTO blocks (indep_hash, height, timestamp, diff, tx_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                block_hash,
                block.height as i64,
                block.timestamp as i64,
                block.diff as i64,
                block.txs.len() as i64,
            ],
        )?;

        for tx in txs {
            let id = tx.id.to_b64();
            db_tx.execute(
                "INSERT OR REPLACE INTO txs (id, block_hash, owner_address, target, data_size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    block_hash,
                    crypto::address_to_hex(&tx.owner_address()),
                    hex::encode(&tx.target),
                    tx.data_size() as i64,
                ],
            )?;
            db_tx.execute("DELETE FROM tags WHERE tx_id = ?1", params![id])?;
            for tag in &tx.tags {
                db_tx.execute(
                    "INSERT INTO tags (tx_id, name, value) VALUES (?1, ?2, ?3)",
                    params![id, tag.name, tag.value],
                )?;
            }
        }

        db_tx.commit()?;
        Ok(())
    }

    pub fn block_hash_at_height(&self, height: u64) -> Result<Option<BlockHash>, StorageError> {
        let conn = self.lock()?;
        let hash: Option<String> = conn
            .query_row(
                "SELECT indep_hash FROM blocks WHERE height = ?1",
                params![height as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.and_then(|h| BlockHash::from_b64(&h).ok()))
    }

    /// Block a transaction was stored with.
    pub fn tx_block(&self, id: &TxId) -> Result<Option<BlockHash>, StorageError> {
        let conn = self.lock()?;
        let hash: Option<String> = conn
            .query_row(
                "SELECT block_hash FROM txs WHERE id = ?1",
                params![id.to_b64()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.and_then(|h| BlockHash::from_b64(&h).ok()))
    }

    pub fn txs_by_tag(&self, name: &[u8], value: &[u8]) -> Result<Vec<TxId>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT tx_id FROM tags WHERE name = ?1 AND value = ?2")?;
        let rows = stmt.query_map(params![name, value], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            if let Ok(id) = TxId::from_b64(&row?) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn block_count(&self) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
