//! Integration tests driving the miner, mempool and storage together

use crossbeam_channel::unbounded;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use weavechain::blockchain::{
    pick_txs_to_mine, verify_anchor, AnchorError, Block, BlockAnchors, WalletEntry, WalletList,
};
use weavechain::config::{MinerConfig, ProtocolParams, StorageConfig};
use weavechain::consensus::{IntervalRetarget, WINSTON_PER_AR};
use weavechain::crypto::KeyPair;
use weavechain::encoding::{Address, BlockHash};
use weavechain::fees;
use weavechain::mempool::{ChainView, Mempool, RejectReason};
use weavechain::miner::{verify_block_pow, DifficultyMode, Miner, MinerEvent, MiningParams};
use weavechain::persistence::{AcceptAll, Storage};
use weavechain::transaction::{Transaction, TxValidator};

const DIFF: u32 = 8;

fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

fn post_fork() -> ProtocolParams {
    ProtocolParams {
        fork_height: 0,
        ..ProtocolParams::default()
    }
}

fn open_storage(dir: &TempDir) -> Result<Storage, Box<dyn std::error::Error>> {
    Ok(Storage::open(&StorageConfig {
        data_dir: dir.path().to_path_buf(),
        disk_space: Some(1 << 30),
        index: true,
        reconcile_interval_secs: 60,
    })?)
}

fn signed_tx(
    keypair: &KeyPair,
    anchor: &BlockHash,
    data: &[u8],
    ledger: &WalletList,
    params: &ProtocolParams,
) -> Result<Transaction, Box<dyn std::error::Error>> {
    let reward = fees::min_fee(data.len(), DIFF, 1, ledger, None, now(), params) * 2;
    Ok(Transaction::new(anchor.0.to_vec(), None, 0, data.to_vec(), reward).sign(keypair)?)
}

#[test]
fn test_mined_block_keeps_submission_order() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let storage = open_storage(&dir)?;
    let alice = KeyPair::generate()?;
    let ledger = WalletList::from_entries([WalletEntry::new(alice.address(), 5 * WINSTON_PER_AR)]);
    let genesis = Block::genesis(&ledger, now(), DIFF);
    storage.write_block(&genesis)?;

    let params = post_fork();
    let first = signed_tx(&alice, &genesis.indep_hash, b"first", &ledger, &params)?;
    let second = signed_tx(&alice, &genesis.indep_hash, b"second", &ledger, &params)?;

    let mut anchors = BlockAnchors::new(params.max_tx_anchor_depth);
    anchors.push(genesis.indep_hash);
    let (owner_tx, owner_rx) = unbounded();
    let miner = Miner::start(
        MiningParams {
            current: genesis.clone(),
            recall: genesis.clone(),
            txs: vec![first.clone(), second.clone()],
            ledger: ledger.clone(),
            anchors,
            reward_addr: Some(Address([7; 32])),
            tags: vec![],
            difficulty: DifficultyMode::Fixed(DIFF),
        },
        &MinerConfig {
            max_miners: 2,
            timestamp_refresh_interval_secs: 3600,
            reward_address: None,
        },
        Arc::new(TxValidator::new(params)),
        Arc::new(IntervalRetarget::default()),
        owner_tx,
    )?;
    let MinerEvent::WorkComplete(solution) = owner_rx.recv_timeout(Duration::from_secs(60))?;
    miner.stop();

    let full = solution.into_full_block(&genesis);
    assert_eq!(full.block.txs, vec![first.id, second.id]);
    assert!(verify_block_pow(&full.block, &genesis, &genesis, &full.txs));

    let stored = storage.write_full_block(&full, &AcceptAll)?;
    assert_eq!(stored, vec![first.id, second.id]);
    assert_eq!(storage.read_tx(&first.id), Some(first.clone()));
    assert_eq!(storage.read_tx(&second.id), Some(second.clone()));

    let reread = storage
        .read_block(&full.block.indep_hash)
        .ok_or("mined block not readable")?;
    assert_eq!(reread, full.block);
    let balance = reread
        .wallet_list
        .as_inline()
        .ok_or("wallet list not loaded")?
        .balance(&alice.address());
    assert_eq!(balance, 5 * WINSTON_PER_AR - first.reward - second.reward);

    let index = storage.index().ok_or("index disabled")?;
    assert_eq!(index.tx_block(&second.id)?, Some(full.block.indep_hash));
    Ok(())
}

#[test]
fn test_anchor_past_depth_is_stale() -> Result<(), Box<dyn std::error::Error>> {
    let params = post_fork();
    let alice = KeyPair::generate()?;
    let ledger =
        WalletList::from_entries([WalletEntry::new(alice.address(), 1_000 * WINSTON_PER_AR)]);

    let oldest = BlockHash([0xAA; 48]);
    let mut anchors = BlockAnchors::new(params.max_tx_anchor_depth);
    anchors.push(oldest);
    for n in 0..params.max_tx_anchor_depth {
        let mut hash = [0u8; 48];
        hash[..8].copy_from_slice(&(n as u64).to_be_bytes());
        anchors.push(BlockHash(hash));
    }
    assert!(!anchors.contains(&oldest));

    let tx = signed_tx(&alice, &oldest, b"late", &ledger, &params)?;
    assert_eq!(verify_anchor(&tx, &ledger, &anchors), Err(AnchorError::Stale));

    let validator = TxValidator::new(params.clone());
    let picked = pick_txs_to_mine(&validator, &ledger, &anchors, &[tx.clone()], DIFF, 1, now());
    assert!(picked.is_empty());

    let weave = HashSet::new();
    let mut mempool = Mempool::new(params);
    let view = ChainView {
        ledger: &ledger,
        anchors: &anchors,
        diff: DIFF,
        height: 1,
        timestamp: now(),
        weave: &weave,
    };
    assert_eq!(mempool.admit(tx, &validator, &view), Err(RejectReason::BadAnchor));
    assert!(mempool.is_empty());
    Ok(())
}

#[test]
fn test_transaction_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let storage = open_storage(&dir)?;
    let keypair = KeyPair::generate()?;
    let tx = Transaction::new(vec![], None, 0, b"DATA1".to_vec(), 1).sign(&keypair)?;

    storage.write_tx(&tx)?;
    assert_eq!(storage.read_tx(&tx.id), Some(tx.clone()));

    fs::remove_file(storage.tx_path(&tx.id))?;
    assert_eq!(storage.read_tx(&tx.id), None);
    Ok(())
}
