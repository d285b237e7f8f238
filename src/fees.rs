/// Minimum transaction fees.
///
/// Before the fork height the fee follows a difficulty-centred curve: a
/// per-byte price that halves for every few bits of difficulty above the
/// centre and grows by 1.2x per megabyte of data. From the fork height on it
/// is the endowment needed to store the bytes for a long horizon at a
/// storage price that declines over time, scaled by the same difficulty
/// factor.
use crate::blockchain::WalletList;
use crate::config::ProtocolParams;
use crate::consensus::{Winston, WINSTON_PER_AR};
use crate::encoding::Address;

/// Charged when a transfer creates its target wallet.
pub const WALLET_GEN_FEE: Winston = WINSTON_PER_AR / 4;

/// Bytes billed for the transaction header on top of its data.
pub const TX_HEADER_SIZE: u64 = 3210;

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * MB;

const PRE_FORK_COST_PER_BYTE: f64 = 10_000.0;
const DIFF_CENTER: f64 = 40.0;
const DIFF_BITS_PER_HALVING: f64 = 8.0;
/// From this height the pre-fork curve centre moves down.
pub const DIFF_CENTER_ADJUST_HEIGHT: u64 = 95_000;
const DIFF_CENTER_ADJUSTMENT: f64 = 2.0;

/// Winston per GB-year at `STORAGE_PRICE_EPOCH`.
const STORAGE_COST_PER_GB_YEAR: f64 = 0.05 * WINSTON_PER_AR as f64;
const STORAGE_PRICE_EPOCH: u64 = 1_577_836_800;
const STORAGE_PRICE_ANNUAL_DECLINE: f64 = 0.005;
const STORAGE_YEARS: i32 = 200;
const STORAGE_REPLICAS: f64 = 10.0;
const SECONDS_PER_YEAR: f64 = 31_536_000.0;

/// Smallest reward `verify` accepts for a transaction carrying `data_size`
/// bytes to `target`.
pub fn min_fee(
    data_size: usize,
    diff: u32,
    height: u64,
    ledger: &WalletList,
    target: Option<&Address>,
    timestamp: u64,
    params: &ProtocolParams,
) -> Winston {
    let base = if params.is_post_fork(height) {
        perpetual_storage_cost(data_size, diff, timestamp)
    } else {
        curve_cost(data_size, diff, height)
    };
    let creates_wallet = target.is_some_and(|addr| !ledger.contains(addr));
    if creates_wallet {
        base + WALLET_GEN_FEE
    } else {
        base
    }
}

fn difficulty_factor(diff: u32, center: f64) -> f64 {
    ((center - diff as f64) / DIFF_BITS_PER_HALVING).exp2()
}

fn to_winston(amount: f64) -> Winston {
    if !amount.is_finite() || amount >= Winston::MAX as f64 {
        return Winston::MAX;
    }
    (amount.ceil() as Winston).max(1)
}

fn curve_cost(data_size: usize, diff: u32, height: u64) -> Winston {
    let center = if height >= DIFF_CENTER_ADJUST_HEIGHT {
        DIFF_CENTER - DIFF_CENTER_ADJUSTMENT
    } else {
        DIFF_CENTER
    };
    let bytes = data_size as f64 + TX_HEADER_SIZE as f64;
    let convexity = 1.2f64.powf(data_size as f64 / MB);
    to_winston(PRE_FORK_COST_PER_BYTE * bytes * convexity * difficulty_factor(diff, center))
}

fn perpetual_storage_cost(data_size: usize, diff: u32, timestamp: u64) -> Winston {
    let years = timestamp.saturating_sub(STORAGE_PRICE_EPOCH) as f64 / SECONDS_PER_YEAR;
    let retained = 1.0 - STORAGE_PRICE_ANNUAL_DECLINE;
    let price_now = STORAGE_COST_PER_GB_YEAR * retained.powf(years);
    // Geometric sum of the declining yearly price over the horizon
    let horizon = (1.0 - retained.powi(STORAGE_YEARS)) / STORAGE_PRICE_ANNUAL_DECLINE;
    let gb = (data_size as f64 + TX_HEADER_SIZE as f64) / GB;
    to_winston(gb * price_now * horizon * STORAGE_REPLICAS * difficulty_factor(diff, DIFF_CENTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::WalletEntry;

    const NOW: u64 = 1_600_000_000;

    fn params(fork_height: u64) -> ProtocolParams {
        ProtocolParams {
            fork_height,
            ..ProtocolParams::default()
        }
    }

    #[test]
    fn test_fee_grows_with_size() {
        let ledger = WalletList::new();
        for fork in [0, u64::MAX] {
            let p = params(fork);
            let small = min_fee(1_000, 20, 10, &ledger, None, NOW, &p);
            let large = min_fee(2_000_000, 20, 10, &ledger, None, NOW, &p);
            assert!(small > 0);
            assert!(large > small);
        }
    }

    #[test]
    fn test_pre_fork_curve_is_convex() {
        let p = params(u64::MAX);
        let ledger = WalletList::new();
        let one = min_fee(MB as usize, 20, 10, &ledger, None, NOW, &p);
        let eight = min_fee(8 * MB as usize, 20, 10, &ledger, None, NOW, &p);
        // More than linear in the data size
        assert!(eight > 8 * one);
    }

    #[test]
    fn test_higher_difficulty_is_cheaper() {
        let p = params(u64::MAX);
        let ledger = WalletList::new();
        let easy = min_fee(10_000, 10, 10, &ledger, None, NOW, &p);
        let hard = min_fee(10_000, 30, 10, &ledger, None, NOW, &p);
        assert!(hard < easy);
    }

    #[test]
    fn test_new_wallet_surcharge() {
        let existing = Address([1; 32]);
        let fresh = Address([2; 32]);
        let ledger = WalletList::from_entries([WalletEntry::new(existing, 100)]);
        let p = params(u64::MAX);

        let to_existing = min_fee(0, 20, 10, &ledger, Some(&existing), NOW, &p);
        let to_fresh = min_fee(0, 20, 10, &ledger, Some(&fresh), NOW, &p);
        let no_target = min_fee(0, 20, 10, &ledger, None, NOW, &p);
        assert_eq!(to_fresh - to_existing, WALLET_GEN_FEE);
        assert_eq!(no_target, to_existing);
    }

    #[test]
    fn test_fork_height_switches_formula() {
        let p = params(100);
        let ledger = WalletList::new();
        let before = min_fee(1_000_000, 20, 99, &ledger, None, NOW, &p);
        let after = min_fee(1_000_000, 20, 100, &ledger, None, NOW, &p);
        assert_ne!(before, after);
        assert_eq!(after, perpetual_storage_cost(1_000_000, 20, NOW));
        assert_eq!(before, curve_cost(1_000_000, 20, 99));
    }

    #[test]
    fn test_storage_cost_declines_over_time() {
        let early = perpetual_storage_cost(1_000_000, 20, STORAGE_PRICE_EPOCH);
        let late = perpetual_storage_cost(1_000_000, 20, STORAGE_PRICE_EPOCH + 20 * 31_536_000);
        assert!(late < early);
    }
}
