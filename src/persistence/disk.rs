//! Disk-space accounting shared by every store of one data directory.

use super::StorageError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Byte budget and usage counters. Updated with atomics only; concurrent
/// writers may both pass `admit` near the limit, which is tolerated.
#[derive(Debug, Default)]
pub struct DiskSpace {
    capacity: AtomicU64,
    used: AtomicU64,
    blocks_on_disk: AtomicU64,
}

impl DiskSpace {
    pub fn new(capacity: u64, used: u64) -> Self {
        DiskSpace {
            capacity: AtomicU64::new(capacity),
            used: AtomicU64::new(used),
            blocks_on_disk: AtomicU64::new(0),
        }
    }

    /// Measure `root` and size the budget: `configured` if set, otherwise
    /// what is already used plus what the filesystem still has free. Blocks
    /// are counted from the files directly under `root/blocks`.
    pub fn probe(root: &Path, configured: Option<u64>) -> Result<Self, StorageError> {
        let used = dir_size(root)?;
        let capacity = match configured {
            Some(capacity) => capacity,
            None => fs2::available_space(root)?.saturating_add(used),
        };
        let blocks = count_json_files(&root.join("blocks"))?;
        debug!(root = %root.display(), capacity, used, blocks, "Probed disk space");
        let disk = Self::new(capacity, used);
        disk.blocks_on_disk.store(blocks, Ordering::Relaxed);
        Ok(disk)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> u64 {
        self.capacity().saturating_sub(self.used())
    }

    pub fn blocks_on_disk(&self) -> u64 {
        self.blocks_on_disk.load(Ordering::Relaxed)
    }

    /// Refuse a write of `size` bytes that would exceed the budget.
    pub fn admit(&self, size: u64) -> Result<(), StorageError> {
        let used = self.used();
        let capacity = self.capacity();
        if used.saturating_add(size) > capacity {
            warn!(needed = size, used, capacity, "Refusing write: disk budget exhausted");
            return Err(StorageError::NotEnoughSpace {
                needed: size,
                available: capacity.saturating_sub(used),
            });
        }
        Ok(())
    }

    pub fn record_write(&self, size: u64) {
        self.used.fetch_add(size, Ordering::Relaxed);
    }

    pub fn release(&self, size: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(size))
            });
    }

    pub fn block_written(&self) {
        self.blocks_on_disk.fetch_add(1, Ordering::Relaxed);
    }

    pub fn block_removed(&self) {
        let _ = self
            .blocks_on_disk
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    /// Tracked usage can undercount files written by others, never the
    /// reverse, so keep the larger of the two.
    pub fn reconcile(&self, measured: u64) {
        self.used.fetch_max(measured, Ordering::Relaxed);
    }

    pub fn reconcile_with(&self, root: &Path) -> Result<(), StorageError> {
        let measured = dir_size(root)?;
        self.reconcile(measured);
        debug!(measured, used = self.used(), "Reconciled disk usage");
        Ok(())
    }
}

/// Total size of the regular files under `path`; zero if it does not exist.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut total = 0;
    for entry in entries {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Number of `*.json` files directly in `dir`; subdirectories are skipped.
fn count_json_files(dir: &Path) -> io::Result<u64> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            count += 1;
        }
    }
    Ok(count)
}

/// Periodically reconcile `disk` against the contents of `root`.
pub fn spawn_disk_monitor(
    disk: Arc<DiskSpace>,
    root: PathBuf,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let disk = Arc::clone(&disk);
            let root = root.clone();
            match tokio::task::spawn_blocking(move || disk.reconcile_with(&root)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Disk usage reconciliation failed"),
                Err(e) => warn!(error = %e, "Disk usage reconciliation task failed"),
            }
        }
    })
}
