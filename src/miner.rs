//! Proof-of-work mining.
//!
//! A [`Miner`] owns a coordinator thread and a pool of worker threads. The
//! coordinator builds the data segment of the next block from the current
//! and recall blocks and the picked transactions, then lets every worker
//! grow its own random nonce until one of them finds a hash with
//! `difficulty` leading zero bits.
//!
//! Any change to the inputs (new transactions, a fresh timestamp) stops the
//! whole pool and spawns a new one under a new generation number. Reports
//! from an older generation are ignored, and a change queued behind a
//! finished report still wins over it, so a solution always covers the most
//! recently accepted transaction set.

use crate::blockchain::{
    block_data_segment, meets_difficulty, pick_txs_to_mine, Block, BlockAnchors, DataSegment,
    FullBlock, Nonce, SegmentInputs, WalletList, WalletListRef, MAX_NONCE_BITS,
};
use crate::config::MinerConfig;
use crate::consensus::Retarget;
use crate::encoding::{Address, BlockHash};
use crate::error::ChainError;
use crate::transaction::{Tag, Transaction, TxValidator};
use crossbeam_channel::{after, bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Hash of `nonce ++ segment` when it meets `diff`. Workers use exactly
/// this check.
pub fn validate(segment: &DataSegment, nonce: &Nonce, diff: u32) -> Option<BlockHash> {
    let hash = segment.pow_hash(nonce);
    if meets_difficulty(&hash, diff) {
        Some(hash)
    } else {
        None
    }
}

pub fn validate_by_hash(hash: &BlockHash, diff: u32) -> bool {
    meets_difficulty(hash, diff)
}

/// Rebuild the data segment of `block` and check its proof of work.
pub fn verify_block_pow(
    block: &Block,
    current: &Block,
    recall: &Block,
    txs: &[Transaction],
) -> bool {
    if block.txs.len() != txs.len() || block.txs.iter().zip(txs).any(|(id, tx)| *id != tx.id) {
        return false;
    }
    let segment = block_data_segment(&SegmentInputs {
        current,
        recall,
        txs,
        reward_addr: block.reward_addr,
        tags: &block.tags,
        timestamp: block.timestamp,
        last_retarget: block.last_retarget,
        diff: block.diff,
        wallet_list_hash: block.wallet_list_hash(),
    });
    validate(&segment, &block.nonce, block.diff) == Some(block.hash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyMode {
    /// Ask the retarget function.
    Auto,
    Fixed(u32),
}

/// Everything the coordinator needs to mine on top of `current`.
#[derive(Debug, Clone)]
pub struct MiningParams {
    pub current: Block,
    pub recall: Block,
    pub txs: Vec<Transaction>,
    /// Ledger as of `current`.
    pub ledger: WalletList,
    pub anchors: BlockAnchors,
    pub reward_addr: Option<Address>,
    pub tags: Vec<Tag>,
    pub difficulty: DifficultyMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    Mining,
    Reconfiguring,
    SolutionFound,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MinerStatus {
    pub state: MinerState,
    /// Bumped every time the worker pool is respawned.
    pub generation: u64,
    pub timestamp: u64,
    pub diff: u32,
    pub tx_count: usize,
}

/// A found block, before it is assembled.
#[derive(Debug, Clone)]
pub struct Solution {
    pub txs: Vec<Transaction>,
    pub hash: BlockHash,
    pub diff: u32,
    pub nonce: Nonce,
    pub timestamp: u64,
    pub last_retarget: u64,
    pub wallet_list: WalletList,
    pub reward_addr: Option<Address>,
    pub tags: Vec<Tag>,
}

impl Solution {
    /// The block this solution extends `current` with.
    pub fn to_block(&self, current: &Block) -> Block {
        let block_size: u64 = self.txs.iter().map(|tx| tx.data_size() as u64).sum();
        let mut block = Block {
            height: current.height + 1,
            previous_block: current.indep_hash,
            timestamp: self.timestamp,
            last_retarget: self.last_retarget,
            diff: self.diff,
            nonce: self.nonce.clone(),
            hash: self.hash,
            indep_hash: BlockHash::zero(),
            txs: self.txs.iter().map(|tx| tx.id).collect(),
            wallet_list: WalletListRef::Inline(self.wallet_list.clone()),
            reward_addr: self.reward_addr,
            tags: self.tags.clone(),
            weave_size: current.weave_size + block_size,
            block_size,
        };
        block.indep_hash = block.compute_indep_hash();
        block
    }

    pub fn into_full_block(self, current: &Block) -> FullBlock {
        let block = self.to_block(current);
        FullBlock::new(block, self.txs)
    }
}

#[derive(Debug, Clone)]
pub enum MinerEvent {
    WorkComplete(Solution),
}

/// Reconfigurations carry an acknowledgement sent once the new pool runs.
enum Command {
    ChangeTxs(Vec<Transaction>, Sender<()>),
    RefreshTimestamp(Sender<()>),
    Stop,
}

struct WorkerReport {
    generation: u64,
    nonce: Nonce,
    hash: BlockHash,
}

/// Handle to a running mining session.
pub struct Miner {
    commands: Sender<Command>,
    status: Arc<Mutex<MinerStatus>>,
    coordinator: Option<JoinHandle<()>>,
}

impl Miner {
    /// Spawn the coordinator and its first worker pool. The solution, if
    /// any, is delivered to `owner`.
    pub fn start(
        params: MiningParams,
        config: &MinerConfig,
        validator: Arc<TxValidator>,
        retarget: Arc<dyn Retarget>,
        owner: Sender<MinerEvent>,
    ) -> Result<Miner, ChainError> {
        let status = Arc::new(Mutex::new(MinerStatus {
            state: MinerState::Idle,
            generation: 0,
            timestamp: 0,
            diff: 0,
            tx_count: 0,
        }));
        let (commands_tx, commands_rx) = unbounded();
        let (reports_tx, reports_rx) = unbounded();

        let coordinator = Coordinator {
            txs: params.txs.clone(),
            params,
            validator,
            retarget,
            owner,
            max_miners: config.max_miners.max(1),
            refresh_interval: Duration::from_secs(config.timestamp_refresh_interval_secs),
            status: Arc::clone(&status),
            generation: 0,
            pool: None,
            candidate: None,
            build_duration: Duration::ZERO,
            refresh_at: Instant::now(),
            reports_tx,
        };

        let handle = thread::Builder::new()
            .name("miner-coordinator".to_string())
            .spawn(move || coordinator.run(commands_rx, reports_rx))
            .map_err(|e| ChainError::MinerError(format!("Failed to spawn coordinator: {}", e)))?;

        Ok(Miner {
            commands: commands_tx,
            status,
            coordinator: Some(handle),
        })
    }

    /// Replace the candidate transactions and restart the workers.
    ///
    /// Returns once workers search with the new set. Fails if the session
    /// already ended, in which case any delivered solution used the
    /// previous set.
    pub fn change_txs(&self, txs: Vec<Transaction>) -> Result<(), ChainError> {
        self.request(|ack| Command::ChangeTxs(txs, ack))
    }

    /// Rebuild the data segment with a fresh timestamp.
    pub fn refresh_timestamp(&self) -> Result<(), ChainError> {
        self.request(Command::RefreshTimestamp)
    }

    /// Stop all workers and the coordinator, waiting for them to exit.
    pub fn stop(mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.coordinator.take() {
            if handle.join().is_err() {
                error!("Miner coordinator panicked");
            }
        }
    }

    pub fn status(&self) -> MinerStatus {
        self.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.status.lock().state,
            MinerState::Idle | MinerState::Mining | MinerState::Reconfiguring
        )
    }

    fn request(&self, command: impl FnOnce(Sender<()>) -> Command) -> Result<(), ChainError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.commands
            .send(command(ack_tx))
            .map_err(|_| ChainError::MinerError("Miner is no longer running".to_string()))?;
        ack_rx.recv().map_err(|_| {
            ChainError::MinerError("Miner finished before the change was applied".to_string())
        })
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
    }
}

/// Delay before the next timestamp refresh, given how long the last data
/// segment took to build.
pub fn refresh_delay(interval: Duration, build_duration: Duration) -> Duration {
    interval.saturating_sub(build_duration)
}

struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(
        count: usize,
        segment: Arc<DataSegment>,
        diff: u32,
        generation: u64,
        reports: &Sender<WorkerReport>,
    ) -> Result<WorkerPool, ChainError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut pool = WorkerPool {
            stop: Arc::clone(&stop),
            handles: Vec::with_capacity(count),
        };
        for index in 0..count {
            let segment = Arc::clone(&segment);
            let stop = Arc::clone(&stop);
            let reports = reports.clone();
            let handle = thread::Builder::new()
                .name(format!("miner-worker-{}", index))
                .spawn(move || search(&segment, diff, generation, &stop, &reports))
                .map_err(|e| ChainError::MinerError(format!("Failed to spawn worker: {}", e)));
            match handle {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn search(
    segment: &DataSegment,
    diff: u32,
    generation: u64,
    stop: &AtomicBool,
    reports: &Sender<WorkerReport>,
) {
    let mut rng = rand::thread_rng();
    let mut nonce = Nonce::new();
    while !stop.load(Ordering::Relaxed) {
        if nonce.len() >= MAX_NONCE_BITS {
            nonce.clear();
        }
        nonce.push_bit(rng.gen());
        if let Some(hash) = validate(segment, &nonce, diff) {
            // First finder wins; siblings see the flag and exit
            if !stop.swap(true, Ordering::Relaxed) {
                let _ = reports.send(WorkerReport {
                    generation,
                    nonce,
                    hash,
                });
            }
            return;
        }
    }
}

/// The block being searched for by the current pool.
struct Candidate {
    txs: Vec<Transaction>,
    timestamp: u64,
    last_retarget: u64,
    diff: u32,
    wallet_list: WalletList,
}

struct Coordinator {
    params: MiningParams,
    /// Raw candidate set; `Candidate::txs` is what survived picking.
    txs: Vec<Transaction>,
    validator: Arc<TxValidator>,
    retarget: Arc<dyn Retarget>,
    owner: Sender<MinerEvent>,
    max_miners: usize,
    refresh_interval: Duration,
    status: Arc<Mutex<MinerStatus>>,
    generation: u64,
    pool: Option<WorkerPool>,
    candidate: Option<Candidate>,
    build_duration: Duration,
    refresh_at: Instant,
    reports_tx: Sender<WorkerReport>,
}

impl Coordinator {
    fn run(mut self, commands: Receiver<Command>, reports: Receiver<WorkerReport>) {
        info!(
            height = self.params.current.height + 1,
            workers = self.max_miners,
            "Starting miner"
        );
        if self.restart("start").is_err() {
            return;
        }

        loop {
            let delay = self.refresh_at.saturating_duration_since(Instant::now());
            select! {
                recv(commands) -> command => {
                    let running = match command {
                        Ok(command) => self.handle(command),
                        Err(_) => self.shut_down(),
                    };
                    if !running {
                        return;
                    }
                },
                recv(reports) -> report => {
                    let Ok(report) = report else { continue };
                    if report.generation != self.generation {
                        debug!(
                            stale = report.generation,
                            current = self.generation,
                            "Ignoring solution from stale workers"
                        );
                        continue;
                    }
                    // A pending change supersedes the pool that found this
                    if let Ok(command) = commands.try_recv() {
                        debug!(generation = self.generation, "Solution superseded by a command");
                        if !self.handle(command) {
                            return;
                        }
                        continue;
                    }
                    self.stop_workers();
                    self.complete(report);
                    return;
                },
                recv(after(delay)) -> _ => {
                    if self.restart("timestamp refresh").is_err() {
                        return;
                    }
                },
            }
        }
    }

    /// Apply `command`; false once the coordinator should exit.
    fn handle(&mut self, command: Command) -> bool {
        let (reason, ack) = match command {
            Command::ChangeTxs(txs, ack) => {
                self.txs = txs;
                ("new transactions", ack)
            }
            Command::RefreshTimestamp(ack) => ("timestamp refresh", ack),
            Command::Stop => return self.shut_down(),
        };
        if self.restart(reason).is_err() {
            return false;
        }
        let _ = ack.send(());
        true
    }

    fn shut_down(&mut self) -> bool {
        self.stop_workers();
        self.set_state(MinerState::Stopped);
        info!(generation = self.generation, "Miner stopped");
        false
    }

    /// Stop the pool, rebuild the candidate and spawn a fresh pool.
    fn restart(&mut self, reason: &str) -> Result<(), ChainError> {
        self.stop_workers();
        self.set_state(MinerState::Reconfiguring);

        let started = Instant::now();
        let current = &self.params.current;
        let height = current.height + 1;
        let timestamp = now_secs() + self.build_duration.as_secs();
        let diff = match self.params.difficulty {
            DifficultyMode::Fixed(diff) => diff,
            DifficultyMode::Auto => self.retarget.next_difficulty(current, timestamp),
        };
        let last_retarget = self.retarget.next_last_retarget(current, timestamp);

        let txs = pick_txs_to_mine(
            &self.validator,
            &self.params.ledger,
            &self.params.anchors,
            &self.txs,
            diff,
            height,
            timestamp,
        );
        let wallet_list = self
            .params
            .ledger
            .apply_transactions(&txs)
            .apply_mining_reward(self.params.reward_addr, &txs, height);
        let segment = block_data_segment(&SegmentInputs {
            current,
            recall: &self.params.recall,
            txs: &txs,
            reward_addr: self.params.reward_addr,
            tags: &self.params.tags,
            timestamp,
            last_retarget,
            diff,
            wallet_list_hash: wallet_list.hash(),
        });
        self.build_duration = started.elapsed();

        if self.build_duration >= self.refresh_interval {
            warn!(
                build_ms = self.build_duration.as_millis() as u64,
                interval_secs = self.refresh_interval.as_secs(),
                "Data segment construction is slower than the refresh interval"
            );
        }
        self.refresh_at =
            Instant::now() + refresh_delay(self.refresh_interval, self.build_duration);

        self.generation += 1;
        let pool = WorkerPool::spawn(
            self.max_miners,
            Arc::new(segment),
            diff,
            self.generation,
            &self.reports_tx,
        );
        let pool = match pool {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "Could not start mining workers");
                self.set_state(MinerState::Stopped);
                return Err(e);
            }
        };
        self.pool = Some(pool);

        info!(
            generation = self.generation,
            height,
            diff,
            txs = txs.len(),
            reason,
            "Mining"
        );
        {
            let mut status = self.status.lock();
            status.state = MinerState::Mining;
            status.generation = self.generation;
            status.timestamp = timestamp;
            status.diff = diff;
            status.tx_count = txs.len();
        }
        self.candidate = Some(Candidate {
            txs,
            timestamp,
            last_retarget,
            diff,
            wallet_list,
        });
        Ok(())
    }

    fn complete(&mut self, report: WorkerReport) {
        self.set_state(MinerState::SolutionFound);
        let Some(candidate) = self.candidate.take() else {
            return;
        };
        info!(
            generation = self.generation,
            hash = %report.hash,
            nonce_bits = report.nonce.len(),
            txs = candidate.txs.len(),
            "Found block solution"
        );
        let solution = Solution {
            txs: candidate.txs,
            hash: report.hash,
            diff: candidate.diff,
            nonce: report.nonce,
            timestamp: candidate.timestamp,
            last_retarget: candidate.last_retarget,
            wallet_list: candidate.wallet_list,
            reward_addr: self.params.reward_addr,
            tags: self.params.tags.clone(),
        };
        if self.owner.send(MinerEvent::WorkComplete(solution)).is_err() {
            warn!("Miner owner is gone, dropping solution");
        }
    }

    fn stop_workers(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    fn set_state(&self, state: MinerState) {
        self.status.lock().state = state;
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::WalletEntry;
    use crate::config::ProtocolParams;
    use crate::consensus::{IntervalRetarget, WINSTON_PER_AR};
    use crate::crypto::KeyPair;
    use crate::fees;
    use crossbeam_channel::RecvTimeoutError;

    fn leading_zero_bits(hash: &BlockHash) -> u32 {
        let mut bits = 0;
        for byte in hash.as_bytes() {
            if *byte == 0 {
                bits += 8;
            } else {
                return bits + byte.leading_zeros();
            }
        }
        bits
    }

    struct Fixture {
        alice: KeyPair,
        genesis: Block,
        ledger: WalletList,
        validator: Arc<TxValidator>,
    }

    fn fixture() -> Fixture {
        let alice = KeyPair::generate().unwrap();
        let ledger =
            WalletList::from_entries([WalletEntry::new(alice.address(), 100 * WINSTON_PER_AR)]);
        let genesis = Block::genesis(&ledger, now_secs(), 8);
        let validator = Arc::new(TxValidator::new(ProtocolParams {
            fork_height: 0,
            ..ProtocolParams::default()
        }));
        Fixture {
            alice,
            genesis,
            ledger,
            validator,
        }
    }

    impl Fixture {
        fn tx(&self, data: &[u8]) -> Transaction {
            let reward = fees::min_fee(
                data.len(),
                1,
                1,
                &self.ledger,
                None,
                now_secs(),
                self.validator.params(),
            ) * 2;
            Transaction::new(self.genesis.indep_hash.0.to_vec(), None, 0, data.to_vec(), reward)
                .sign(&self.alice)
                .unwrap()
        }

        fn params(&self, txs: Vec<Transaction>, diff: u32) -> MiningParams {
            let mut anchors = BlockAnchors::new(50);
            anchors.push(self.genesis.indep_hash);
            MiningParams {
                current: self.genesis.clone(),
                recall: self.genesis.clone(),
                txs,
                ledger: self.ledger.clone(),
                anchors,
                reward_addr: Some(Address([9; 32])),
                tags: vec![],
                difficulty: DifficultyMode::Fixed(diff),
            }
        }

        fn start(
            &self,
            txs: Vec<Transaction>,
            diff: u32,
            workers: usize,
        ) -> (Miner, Receiver<MinerEvent>) {
            self.start_with_refresh(txs, diff, workers, 3600)
        }

        fn start_with_refresh(
            &self,
            txs: Vec<Transaction>,
            diff: u32,
            workers: usize,
            refresh_secs: u64,
        ) -> (Miner, Receiver<MinerEvent>) {
            let (owner_tx, owner_rx) = unbounded();
            let config = MinerConfig {
                max_miners: workers,
                timestamp_refresh_interval_secs: refresh_secs,
                reward_address: None,
            };
            let miner = Miner::start(
                self.params(txs, diff),
                &config,
                Arc::clone(&self.validator),
                Arc::new(IntervalRetarget::default()),
                owner_tx,
            )
            .unwrap();
            (miner, owner_rx)
        }
    }

    fn wait_for_generation(miner: &Miner, generation: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while miner.status().generation < generation {
            assert!(Instant::now() < deadline, "miner never reached generation {}", generation);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_validate_matches_leading_zero_rule() {
        let segment = DataSegment::from_bytes(b"some block data segment".to_vec());
        let mut nonce = Nonce::new();
        let mut rng = rand::thread_rng();
        let mut found = 0;
        for _ in 0..20_000 {
            if nonce.len() >= MAX_NONCE_BITS {
                nonce.clear();
            }
            nonce.push_bit(rng.gen());
            let hash = segment.pow_hash(&nonce);
            match validate(&segment, &nonce, 6) {
                Some(valid) => {
                    assert_eq!(valid, hash);
                    assert!(leading_zero_bits(&valid) >= 6);
                    assert!(validate_by_hash(&valid, 6));
                    found += 1;
                }
                None => {
                    assert!(leading_zero_bits(&hash) < 6);
                    assert!(!validate_by_hash(&hash, 6));
                }
            }
        }
        assert!(found > 0);
    }

    #[test]
    fn test_refresh_delay_never_negative() {
        let interval = Duration::from_secs(10);
        assert_eq!(refresh_delay(interval, Duration::from_secs(3)), Duration::from_secs(7));
        assert_eq!(refresh_delay(interval, Duration::from_secs(12)), Duration::ZERO);
    }

    #[test]
    fn test_mines_a_verifiable_block() {
        let f = fixture();
        let tx = f.tx(b"payload");
        let (miner, events) = f.start(vec![tx.clone()], 8, 2);

        let MinerEvent::WorkComplete(solution) =
            events.recv_timeout(Duration::from_secs(60)).unwrap();
        assert_eq!(solution.txs, vec![tx.clone()]);
        assert_eq!(solution.diff, 8);
        assert!(validate_by_hash(&solution.hash, 8));

        let block = solution.clone().into_full_block(&f.genesis);
        assert_eq!(block.block.height, 1);
        assert_eq!(block.block.previous_block, f.genesis.indep_hash);
        assert_eq!(block.block.txs, vec![tx.id]);
        assert!(verify_block_pow(&block.block, &f.genesis, &f.genesis, &block.txs));

        let mut forged = block.block.clone();
        forged.timestamp += 1;
        assert!(!verify_block_pow(&forged, &f.genesis, &f.genesis, &block.txs));

        miner.stop();
    }

    #[test]
    fn test_solution_uses_latest_transactions() {
        let f = fixture();
        let first = f.tx(b"first set");
        let second = f.tx(b"second set");
        let (miner, events) = f.start(vec![first], 200, 1);
        wait_for_generation(&miner, 1);
        miner.change_txs(vec![second.clone()]).unwrap();
        assert_eq!(miner.status().generation, 2);
        assert_eq!(miner.status().tx_count, 1);
        miner.stop();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_accepted_change_always_wins() {
        let f = fixture();
        let first = f.tx(b"first set");
        let second = f.tx(b"second set");
        for _ in 0..20 {
            // Easy enough that the first pool often finishes before the change
            let (miner, events) = f.start(vec![first.clone()], 2, 1);
            let changed = miner.change_txs(vec![second.clone()]).is_ok();
            let MinerEvent::WorkComplete(solution) =
                events.recv_timeout(Duration::from_secs(60)).unwrap();
            if changed {
                assert_eq!(solution.txs, vec![second.clone()]);
            } else {
                assert_eq!(solution.txs, vec![first.clone()]);
            }
            miner.stop();
        }
    }

    #[test]
    fn test_timer_refreshes_timestamp() {
        let f = fixture();
        let (miner, events) = f.start_with_refresh(vec![], 200, 1, 1);
        wait_for_generation(&miner, 1);
        let first = miner.status().timestamp;

        wait_for_generation(&miner, 2);
        let status = miner.status();
        assert!(status.timestamp > first);
        assert_eq!(status.state, MinerState::Mining);
        miner.stop();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_slow_build_refreshes_immediately() {
        let f = fixture();
        // Any build takes at least as long as a zero interval
        let (miner, _events) = f.start_with_refresh(vec![], 200, 1, 0);
        wait_for_generation(&miner, 5);
        assert!(miner.is_running());
        miner.stop();
    }

    #[test]
    fn test_refresh_restarts_workers() {
        let f = fixture();
        let (miner, events) = f.start(vec![], 200, 1);
        wait_for_generation(&miner, 1);

        miner.refresh_timestamp().unwrap();
        wait_for_generation(&miner, 2);
        miner.change_txs(vec![]).unwrap();
        wait_for_generation(&miner, 3);
        assert_eq!(miner.status().state, MinerState::Mining);

        miner.stop();
        assert!(matches!(
            events.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_stop_ends_session() {
        let f = fixture();
        let (miner, _events) = f.start(vec![], 200, 2);
        wait_for_generation(&miner, 1);
        let status = Arc::clone(&miner.status);
        miner.stop();
        assert_eq!(status.lock().state, MinerState::Stopped);
    }
}
