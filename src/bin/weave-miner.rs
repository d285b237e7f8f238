#![forbid(unsafe_code)]
//! Standalone miner for WeaveChain
//!
//! Extends the chain stored under the configured data directory by a
//! number of blocks and persists each one as it is found.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use weavechain::blockchain::{calculate_recall_block, Block, BlockAnchors, FullBlock, WalletList};
use weavechain::config::{load_config, Config};
use weavechain::consensus::{IntervalRetarget, Retarget, DEFAULT_DIFFICULTY};
use weavechain::crypto;
use weavechain::encoding::{Address, BlockHash};
use weavechain::error::ChainError;
use weavechain::miner::{DifficultyMode, Miner, MinerEvent, MiningParams};
use weavechain::persistence::{spawn_disk_monitor, AcceptAll, Storage, TxFilter};
use weavechain::security::Firewall;
use weavechain::transaction::TxValidator;

#[derive(Debug, Clone, Copy)]
struct Difficulty(DifficultyMode);

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Difficulty(DifficultyMode::Auto));
        }
        s.parse::<u32>()
            .map(|diff| Difficulty(DifficultyMode::Fixed(diff)))
            .map_err(|_| format!("expected a number of bits or \"auto\", got {:?}", s))
    }
}

#[derive(Parser, Debug)]
#[command(name = "weave-miner", about = "Mine blocks on a local weave")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "weavechain.toml")]
    config: PathBuf,

    /// Leading zero bits required of a block hash, or "auto"
    #[arg(long, default_value = "auto")]
    difficulty: Difficulty,

    /// Number of blocks to mine before exiting
    #[arg(long, default_value_t = 1)]
    blocks: u64,

    /// JSON file of content signatures; transaction bodies matching one are not stored
    #[arg(long)]
    signatures: Option<PathBuf>,
}

/// Newest-first hash list of the stored chain. The chain tip is only known
/// to the index, so mining on a data directory without one is refused.
fn load_hash_list(storage: &Storage) -> Result<Vec<BlockHash>, ChainError> {
    let Some(index) = storage.index() else {
        return Err(ChainError::ConfigError(
            "weave-miner needs storage.index = true to find the chain tip".to_string(),
        ));
    };
    let count = index.block_count()?;
    let mut hash_list = Vec::with_capacity(count as usize);
    for height in (0..count).rev() {
        let hash = index.block_hash_at_height(height)?.ok_or_else(|| {
            ChainError::BlockNotFound(format!("no indexed block at height {}", height))
        })?;
        hash_list.push(hash);
    }
    Ok(hash_list)
}

fn mine_blocks(
    config: Config,
    storage: Arc<Storage>,
    difficulty: DifficultyMode,
    blocks: u64,
    filter: Arc<dyn TxFilter>,
) -> Result<(), ChainError> {
    let reward_addr: Option<Address> = config
        .miner
        .reward_address
        .as_deref()
        .map(crypto::address_from_hex)
        .transpose()?;
    let validator = Arc::new(TxValidator::new(config.protocol.clone()));
    let retarget: Arc<dyn Retarget> = Arc::new(IntervalRetarget::default());

    let mut hash_list = load_hash_list(&storage)?;
    if hash_list.is_empty() {
        let diff = match difficulty {
            DifficultyMode::Fixed(diff) => diff,
            DifficultyMode::Auto => DEFAULT_DIFFICULTY,
        };
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        let genesis = Block::genesis(&WalletList::new(), timestamp, diff);
        storage.write_full_block(&FullBlock::new(genesis.clone(), Vec::new()), &AcceptAll)?;
        info!(block = %genesis.indep_hash, diff, "Created genesis block");
        hash_list.push(genesis.indep_hash);
    }

    for _ in 0..blocks {
        let current = storage
            .read_block(&hash_list[0])
            .ok_or_else(|| ChainError::BlockNotFound(hash_list[0].to_string()))?;
        let recall_height = calculate_recall_block(&current.indep_hash, current.height);
        let recall = storage
            .read_block_by_height(recall_height, &hash_list)
            .ok_or_else(|| {
                ChainError::BlockNotFound(format!("recall block at height {}", recall_height))
            })?;
        let ledger = current
            .wallet_list
            .as_inline()
            .cloned()
            .ok_or_else(|| ChainError::InvalidBlock("wallet list not loaded".to_string()))?;

        let params = MiningParams {
            current: current.clone(),
            recall,
            txs: Vec::new(),
            ledger,
            anchors: BlockAnchors::from_hash_list(&hash_list, config.protocol.max_tx_anchor_depth),
            reward_addr,
            tags: Vec::new(),
            difficulty,
        };
        let (owner_tx, owner_rx) = crossbeam_channel::unbounded();
        let miner = Miner::start(
            params,
            &config.miner,
            Arc::clone(&validator),
            Arc::clone(&retarget),
            owner_tx,
        )?;
        let event = owner_rx
            .recv()
            .map_err(|_| ChainError::MinerError("miner exited without a solution".to_string()));
        miner.stop();
        let MinerEvent::WorkComplete(solution) = event?;

        let full = solution.into_full_block(&current);
        let stored = storage.write_full_block(&full, filter.as_ref())?;
        hash_list.insert(0, full.block.indep_hash);
        let hash_list_hash = storage.write_hash_list(&hash_list)?;
        info!(
            height = full.block.height,
            block = %full.block.indep_hash,
            diff = full.block.diff,
            txs = stored.len(),
            hash_list = %hash_list_hash,
            "Stored mined block"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let storage = Arc::new(Storage::open(&config.storage)?);
    let filter: Arc<dyn TxFilter> = match &args.signatures {
        Some(path) => Arc::new(Firewall::load(path)?),
        None => Arc::new(AcceptAll),
    };

    let monitor = spawn_disk_monitor(
        Arc::clone(storage.disk()),
        storage.root().to_path_buf(),
        Duration::from_secs(config.storage.reconcile_interval_secs.max(1)),
    );

    let blocks = args.blocks;
    let difficulty = args.difficulty.0;
    let result = tokio::task::spawn_blocking(move || {
        mine_blocks(config, storage, difficulty, blocks, filter)
    })
    .await;
    monitor.abort();

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(error = %e, "Mining failed");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
