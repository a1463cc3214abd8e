//! Cache statistics counters.
//!
//! Atomic counters updated on the hot path, read via a cloneable snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters maintained by one cache engine.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    inst_hits: AtomicU64,
    mem_hits: AtomicU64,
    fs_hits: AtomicU64,
    del_hits: AtomicU64,
    mem_writes: AtomicU64,
    mem_deletes: AtomicU64,
    fs_reads: AtomicU64,
    fs_writes: AtomicU64,
    fs_read_time_ns: AtomicU64,
    fs_write_time_ns: AtomicU64,
    costing_time_ns: AtomicU64,
}

impl CacheStatistics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a reused instruction (full or partial).
    pub fn increment_inst_hits(&self) {
        self.inst_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a probe served from the resident index.
    pub fn increment_mem_hits(&self) {
        self.mem_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a probe served by rehydrating a spilled entry.
    pub fn increment_fs_hits(&self) {
        self.fs_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a probe of a key that was previously evicted.
    pub fn increment_del_hits(&self) {
        self.del_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an entry inserted into the resident index.
    pub fn increment_mem_writes(&self) {
        self.mem_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an entry removed from the resident index by eviction.
    pub fn increment_mem_deletes(&self) {
        self.mem_deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a spill-file read and its wall time.
    pub fn add_fs_read(&self, elapsed: Duration) {
        self.fs_reads.fetch_add(1, Ordering::Relaxed);
        self.fs_read_time_ns
            .fetch_add(duration_ns(elapsed), Ordering::Relaxed);
    }

    /// Counts a spill-file write and its wall time.
    pub fn add_fs_write(&self, elapsed: Duration) {
        self.fs_writes.fetch_add(1, Ordering::Relaxed);
        self.fs_write_time_ns
            .fetch_add(duration_ns(elapsed), Ordering::Relaxed);
    }

    /// Accumulates time spent in the cost model.
    pub fn add_costing_time(&self, elapsed: Duration) {
        self.costing_time_ns
            .fetch_add(duration_ns(elapsed), Ordering::Relaxed);
    }

    /// Clears all counters.
    pub fn reset(&self) {
        self.inst_hits.store(0, Ordering::Relaxed);
        self.mem_hits.store(0, Ordering::Relaxed);
        self.fs_hits.store(0, Ordering::Relaxed);
        self.del_hits.store(0, Ordering::Relaxed);
        self.mem_writes.store(0, Ordering::Relaxed);
        self.mem_deletes.store(0, Ordering::Relaxed);
        self.fs_reads.store(0, Ordering::Relaxed);
        self.fs_writes.store(0, Ordering::Relaxed);
        self.fs_read_time_ns.store(0, Ordering::Relaxed);
        self.fs_write_time_ns.store(0, Ordering::Relaxed);
        self.costing_time_ns.store(0, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot for reporting and tests.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inst_hits: self.inst_hits.load(Ordering::Relaxed),
            mem_hits: self.mem_hits.load(Ordering::Relaxed),
            fs_hits: self.fs_hits.load(Ordering::Relaxed),
            del_hits: self.del_hits.load(Ordering::Relaxed),
            mem_writes: self.mem_writes.load(Ordering::Relaxed),
            mem_deletes: self.mem_deletes.load(Ordering::Relaxed),
            fs_reads: self.fs_reads.load(Ordering::Relaxed),
            fs_writes: self.fs_writes.load(Ordering::Relaxed),
            fs_read_time_ns: self.fs_read_time_ns.load(Ordering::Relaxed),
            fs_write_time_ns: self.fs_write_time_ns.load(Ordering::Relaxed),
            costing_time_ns: self.costing_time_ns.load(Ordering::Relaxed),
        }
    }
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Reused instructions (full or partial).
    pub inst_hits: u64,
    /// Probes served from the resident index.
    pub mem_hits: u64,
    /// Probes served by rehydrating a spilled entry.
    pub fs_hits: u64,
    /// Probes of keys that were previously evicted.
    pub del_hits: u64,
    /// Entries inserted into the resident index.
    pub mem_writes: u64,
    /// Entries removed from the resident index by eviction.
    pub mem_deletes: u64,
    /// Spill-file reads.
    pub fs_reads: u64,
    /// Spill-file writes.
    pub fs_writes: u64,
    /// Cumulative spill-read wall time.
    pub fs_read_time_ns: u64,
    /// Cumulative spill-write wall time.
    pub fs_write_time_ns: u64,
    /// Cumulative cost-model wall time.
    pub costing_time_ns: u64,
}

impl StatsSnapshot {
    /// Probes served without recomputation, from memory or disk.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.mem_hits + self.fs_hits
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits inst/mem/fs/del: {}/{}/{}/{}, writes/deletes: {}/{}, fs r/w: {}/{}",
            self.inst_hits,
            self.mem_hits,
            self.fs_hits,
            self.del_hits,
            self.mem_writes,
            self.mem_deletes,
            self.fs_reads,
            self.fs_writes,
        )
    }
}
