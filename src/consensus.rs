//! Protocol constants, difficulty retargeting and the inflation schedule.

use crate::blockchain::Block;

pub type Winston = i128;

pub const WINSTON_PER_AR: Winston = 1_000_000_000_000;

/// Height from which anchors are block hashes and fees follow the
/// perpetual-storage endowment curve.
pub const FORK_HEIGHT: u64 = 269_510;

pub const TX_DATA_SIZE_LIMIT: usize = 10 * 1024 * 1024;
pub const BLOCK_TX_COUNT_LIMIT: usize = 1000;
pub const BLOCK_TX_DATA_SIZE_LIMIT: usize = 10 * 1024 * 1024;
pub const MEMPOOL_DATA_SIZE_LIMIT: usize = 5 * TX_DATA_SIZE_LIMIT;
pub const MAX_TX_ANCHOR_DEPTH: usize = 50;

/// Difficulty is a count of leading zero bits of a SHA-384 digest.
pub const MIN_DIFFICULTY: u32 = 1;
pub const MAX_DIFFICULTY: u32 = 384;
pub const DEFAULT_DIFFICULTY: u32 = 8;

pub const RETARGET_BLOCKS: u64 = 10;
pub const TARGET_BLOCK_TIME: u64 = 120;
/// Percentage deviation from the expected window time tolerated without a retarget.
pub const RETARGET_TOLERANCE_PERCENT: u64 = 10;

const INITIAL_REWARD: Winston = 50 * WINSTON_PER_AR;
const HALVING_INTERVAL: u64 = 210_000;

/// Difficulty retarget dependency of the miner. Implementations must be pure.
pub trait Retarget: Send + Sync {
    fn next_difficulty(&self, prev: &Block, timestamp: u64) -> u32;

    /// `last_retarget` value carried by the block following `prev`.
    fn next_last_retarget(&self, prev: &Block, timestamp: u64) -> u64;
}

/// Adjusts the difficulty by one bit every `interval` blocks when the
/// window took noticeably longer or shorter than expected.
#[derive(Debug, Clone)]
pub struct IntervalRetarget {
    pub interval: u64,
    pub target_block_time: u64,
}

impl Default for IntervalRetarget {
    fn default() -> Self {
        Self {
            interval: RETARGET_BLOCKS,
            target_block_time: TARGET_BLOCK_TIME,
        }
    }
}

impl IntervalRetarget {
    fn is_retarget_height(&self, height: u64) -> bool {
        height > 0 && self.interval > 0 && height % self.interval == 0
    }
}

impl Retarget for IntervalRetarget {
    fn next_difficulty(&self, prev: &Block, timestamp: u64) -> u32 {
        if !self.is_retarget_height(prev.height + 1) {
            return prev.diff;
        }
        let actual = timestamp.saturating_sub(prev.last_retarget);
        let expected = self.interval * self.target_block_time;
        let lower = expected * (100 - RETARGET_TOLERANCE_PERCENT) / 100;
        let upper = expected * (100 + RETARGET_TOLERANCE_PERCENT) / 100;

        if actual < lower {
            (prev.diff + 1).min(MAX_DIFFICULTY)
        } else if actual > upper {
            prev.diff.saturating_sub(1).max(MIN_DIFFICULTY)
        } else {
            prev.diff
        }
    }

    fn next_last_retarget(&self, prev: &Block, timestamp: u64) -> u64 {
        if self.is_retarget_height(prev.height + 1) {
            timestamp
        } else {
            prev.last_retarget
        }
    }
}

/// Newly minted winston paid to the miner of the block at `height`.
pub fn block_reward(height: u64) -> Winston {
    let halving_count = height / HALVING_INTERVAL;
    if halving_count >= 64 {
        0
    } else {
        INITIAL_REWARD >> halving_count
    }
}
