//! The cache engine: probe, placeholder coordination, insertion, and size
//! accounting behind a single coarse lock.
//!
//! The resident index is recency-ordered (front = least recently used,
//! back = most recently used); a touch moves the entry to the back. Values
//! are guarded by per-entry monitors so producers publish without holding
//! the engine lock.

use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::cache::admission;
use crate::cache::entry::{CacheEntry, CacheStatus};
use crate::cache::spill::SpillRecord;
use crate::config::CacheConfig;
use crate::context::ExecutionContext;
use crate::cost::{IoCostEstimator, StaticBandwidthModel};
use crate::data::Data;
use crate::error::{Error, Result};
use crate::instruction::Instruction;
use crate::lineage::LineageItem;
use crate::stats::{CacheStatistics, StatsSnapshot};

/// External rewrite engine for partial reuse.
///
/// Invoked on a full-reuse miss while the engine lock is held; an
/// implementation must not call back into the cache.
pub trait RewriteReuse: Send + Sync {
    /// Attempts to produce the instruction's output from cached
    /// intermediates via algebraic rewrites. Returns true on success.
    fn try_rewrite(&self, inst: &Instruction, ctx: &mut ExecutionContext) -> bool;
}

pub(crate) struct EngineInner {
    /// Resident entries in recency order; front = LRU, back = MRU.
    pub(crate) index: IndexMap<Arc<LineageItem>, Arc<CacheEntry>>,
    /// Evicted-to-disk entries, keyed by the lineage that produced them.
    pub(crate) spill: FxHashMap<Arc<LineageItem>, SpillRecord>,
    /// Keys evicted outright, kept for diagnostics.
    pub(crate) removed: FxHashSet<Arc<LineageItem>>,
    pub(crate) bytes_resident: u64,
    pub(crate) out_dir: Option<PathBuf>,
}

/// Lineage-keyed computation reuse cache.
///
/// Shared by all worker threads of a runtime; every operation that inspects
/// or mutates the resident state acquires the single engine lock.
pub struct LineageCache {
    config: CacheConfig,
    limit_bytes: u64,
    io_cost: Arc<dyn IoCostEstimator>,
    rewriter: Option<Arc<dyn RewriteReuse>>,
    stats: CacheStatistics,
    inner: Mutex<EngineInner>,
}

impl LineageCache {
    /// Creates an engine with the given configuration.
    ///
    /// The byte budget is fixed here and never re-read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let limit_bytes = config.cache_limit_bytes();
        Ok(Self {
            config,
            limit_bytes,
            io_cost: Arc::new(StaticBandwidthModel::default()),
            rewriter: None,
            stats: CacheStatistics::new(),
            inner: Mutex::new(EngineInner {
                index: IndexMap::new(),
                spill: FxHashMap::default(),
                removed: FxHashSet::default(),
                bytes_resident: 0,
                out_dir: None,
            }),
        })
    }

    /// Replaces the spill IO cost model.
    #[must_use]
    pub fn with_io_cost(mut self, io_cost: Arc<dyn IoCostEstimator>) -> Self {
        self.io_cost = io_cost;
        self
    }

    /// Attaches the external rewrite engine used for partial reuse.
    #[must_use]
    pub fn with_rewriter(mut self, rewriter: Arc<dyn RewriteReuse>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The fixed byte budget of the resident cache.
    #[must_use]
    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Current sum of resident entry sizes.
    #[must_use]
    pub fn bytes_resident(&self) -> u64 {
        self.inner.lock().bytes_resident
    }

    /// Number of resident entries (including placeholders).
    #[must_use]
    pub fn resident_len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Number of spilled entries.
    #[must_use]
    pub fn spilled_len(&self) -> usize {
        self.inner.lock().spill.len()
    }

    /// Snapshot of the observable counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Clears the observable counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub(crate) fn inner_lock(&self) -> parking_lot::MutexGuard<'_, EngineInner> {
        self.inner.lock()
    }

    pub(crate) fn io_cost(&self) -> &dyn IoCostEstimator {
        self.io_cost.as_ref()
    }

    pub(crate) fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    // --------------------- cache logic methods ----------------------

    /// Probes the cache for an instruction about to execute.
    ///
    /// On a hit the cached value is bound to the instruction's output
    /// variable and true is returned; the caller skips execution. On a miss
    /// a placeholder is installed (when the output is admissible) so that
    /// concurrent threads compute this lineage at most once, and false is
    /// returned.
    ///
    /// Best-effort: internal failures are logged and reported as a miss.
    pub fn reuse_instruction(&self, inst: &Instruction, ctx: &mut ExecutionContext) -> bool {
        if self.config.cache_type.is_none() {
            return false;
        }
        if !admission::is_reusable(inst, ctx, &self.config) {
            return false;
        }
        match self.try_reuse_instruction(inst, ctx) {
            Ok(reused) => reused,
            Err(e) => {
                warn!(error = %e, opcode = inst.opcode(), "lineage reuse failed, executing instruction");
                false
            }
        }
    }

    fn try_reuse_instruction(&self, inst: &Instruction, ctx: &mut ExecutionContext) -> Result<bool> {
        let item = inst.lineage_item(ctx);
        let mut hit: Option<Arc<CacheEntry>> = None;
        let mut reuse = false;
        {
            let mut inner = self.inner.lock();
            if self.config.cache_type.is_full_reuse() && self.probe_locked(&mut inner, &item) {
                hit = match self.lookup(&mut inner, &item) {
                    Ok(entry) => entry,
                    Err(Error::Io(e)) => {
                        // the spilled value is gone; forget it and recompute
                        warn!(error = %e, "rehydration failed, dropping spill record");
                        inner.spill.remove(&item);
                        None
                    }
                    Err(e) => return Err(e),
                };
                reuse = hit.is_some();
            }
            if !reuse && self.config.cache_type.is_partial_reuse() {
                if let Some(rewriter) = &self.rewriter {
                    reuse = rewriter.try_rewrite(inst, ctx);
                }
            }
            if reuse {
                self.stats.increment_inst_hits();
            }
            if !reuse && admission::is_marked_for_caching(inst, ctx, &self.config) {
                self.put_intern(&mut inner, item, None, 0)?;
            }
        }
        if let Some(entry) = hit {
            // blocks on the per-entry monitor while a producer is in flight
            match entry.get_value() {
                Data::Matrix(mb) => ctx.set_matrix_output(inst.output().name.clone(), mb),
                Data::Scalar(so) => ctx.set_scalar_output(inst.output().name.clone(), so),
            }
        }
        Ok(reuse)
    }

    /// Lower-level probe returning the entry, used by function-scope reuse.
    ///
    /// On a miss a placeholder is installed under the key and `None` is
    /// returned; the caller is then the designated producer.
    ///
    /// # Errors
    ///
    /// Propagates rehydration IO failures: the caller relies on a value
    /// that cannot be produced.
    pub fn reuse_item(&self, item: &Arc<LineageItem>) -> Result<Option<Arc<CacheEntry>>> {
        if self.config.cache_type.is_none() {
            return Ok(None);
        }
        let mut inner = self.inner.lock();
        if self.probe_locked(&mut inner, item) {
            self.lookup(&mut inner, item)
        } else {
            self.put_intern(&mut inner, Arc::clone(item), None, 0)?;
            Ok(None)
        }
    }

    /// Inserts a completed matrix result under the instruction's lineage.
    ///
    /// Best-effort: failures are logged and the result simply stays
    /// uncached.
    pub fn put(&self, inst: &Instruction, ctx: &ExecutionContext, exec_time_ns: u64) {
        if self.config.cache_type.is_none() {
            return;
        }
        if !admission::is_reusable(inst, ctx, &self.config) {
            return;
        }
        let item = inst.lineage_item(ctx);
        match ctx.get_matrix(&inst.output().name) {
            Ok(mb) => {
                let mut inner = self.inner.lock();
                if let Err(e) = self.put_intern(&mut inner, item, Some(Data::Matrix(mb)), exec_time_ns) {
                    warn!(error = %e, opcode = inst.opcode(), "lineage insert failed");
                }
            }
            Err(e) => warn!(error = %e, opcode = inst.opcode(), "lineage insert failed"),
        }
    }

    /// Fills the placeholder installed at probe time with the now-known
    /// value and wakes all threads waiting on it.
    ///
    /// Best-effort: failures are logged and the result simply stays
    /// uncached.
    pub fn put_value(&self, inst: &Instruction, ctx: &ExecutionContext, exec_time_ns: u64) {
        if self.config.cache_type.is_none() {
            return;
        }
        if !admission::is_reusable(inst, ctx, &self.config) {
            return;
        }
        if !admission::is_marked_for_caching(inst, ctx, &self.config) {
            return;
        }
        let item = inst.lineage_item(ctx);
        let Some(data) = ctx.get_variable(&inst.output().name) else {
            warn!(opcode = inst.opcode(), "output unbound after execution, not caching");
            return;
        };
        let entry = {
            let inner = self.inner.lock();
            inner.index.get(&item).cloned()
        };
        // the placeholder can be gone after a reset
        let Some(entry) = entry else { return };
        // publish outside the engine lock to avoid serializing the cache
        // behind waiter wakeups
        entry.set_value(data, exec_time_ns);
        self.account_value(&item, &entry);
    }

    /// Copies a probed value into the placeholder under `item`, recording
    /// `probe_item` as the original producing lineage. Used by
    /// function-scope reuse; removes the placeholder when the bound lineage
    /// misses.
    pub fn put_value_item(
        &self,
        item: &Arc<LineageItem>,
        probe_item: &Arc<LineageItem>,
        exec_time_ns: u64,
    ) {
        if self.config.cache_type.is_none() {
            return;
        }
        let (dst, src) = {
            let mut inner = self.inner.lock();
            if !self.probe_locked(&mut inner, probe_item) {
                self.drop_placeholder_locked(&mut inner, item);
                return;
            }
            let src = match self.lookup(&mut inner, probe_item) {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.drop_placeholder_locked(&mut inner, item);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "bound lineage unavailable, not caching function output");
                    self.drop_placeholder_locked(&mut inner, item);
                    return;
                }
            };
            let Some(dst) = inner.index.get(item).cloned() else {
                return;
            };
            (dst, src)
        };
        let data = src.get_value();
        dst.set_value(data, exec_time_ns);
        dst.set_orig_item(Arc::clone(probe_item));
        self.account_value(item, &dst);
    }

    /// Marks a resident valued entry as pinned, excluding it from eviction
    /// while a function or statement block executes over it.
    pub fn pin(&self, item: &Arc<LineageItem>) {
        let inner = self.inner.lock();
        if let Some(entry) = inner.index.get(item) {
            if !entry.is_empty_value() {
                entry.set_status(CacheStatus::Pinned);
            }
        }
    }

    /// Releases a pin set by [`pin`](Self::pin).
    pub fn unpin(&self, item: &Arc<LineageItem>) {
        let inner = self.inner.lock();
        if let Some(entry) = inner.index.get(item) {
            if entry.status() == CacheStatus::Pinned {
                entry.set_status(CacheStatus::Cached);
            }
        }
    }

    /// Whether the key is present, resident or spilled.
    #[must_use]
    pub fn probe(&self, item: &Arc<LineageItem>) -> bool {
        let mut inner = self.inner.lock();
        self.probe_locked(&mut inner, item)
    }

    /// Clears the index, the spill list, and the resident byte count, and
    /// deletes the transient spill files.
    ///
    /// Must not be called while producers hold placeholders: their waiters
    /// would never be released.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.delete_spill_dir(&mut inner);
        inner.index.clear();
        inner.removed.clear();
        inner.bytes_resident = 0;
    }

    // --------------------- internal helpers ----------------------

    pub(crate) fn probe_locked(&self, inner: &mut EngineInner, item: &Arc<LineageItem>) -> bool {
        let present = inner.index.contains_key(item) || inner.spill.contains_key(item);
        if !present && inner.removed.contains(item) {
            // the sought entry was cached once and evicted since
            self.stats.increment_del_hits();
        }
        present
    }

    /// Returns the entry for a present key, touching it to the MRU end and
    /// rehydrating from disk when necessary.
    pub(crate) fn lookup(
        &self,
        inner: &mut EngineInner,
        item: &Arc<LineageItem>,
    ) -> Result<Option<Arc<CacheEntry>>> {
        if let Some((key, entry)) = inner.index.shift_remove_entry(item) {
            inner.index.insert(key, Arc::clone(&entry));
            self.stats.increment_mem_hits();
            return Ok(Some(entry));
        }
        if inner.spill.contains_key(item) {
            return self.read_from_disk(inner, item).map(Some);
        }
        Ok(None)
    }

    pub(crate) fn fits(&self, inner: &EngineInner, need: u64) -> bool {
        inner.bytes_resident + need <= self.limit_bytes
    }

    /// Creates an entry under `key` at the MRU end, evicting as needed.
    /// Entries larger than the whole budget are silently not inserted.
    pub(crate) fn put_intern(
        &self,
        inner: &mut EngineInner,
        key: Arc<LineageItem>,
        data: Option<Data>,
        exec_time_ns: u64,
    ) -> Result<()> {
        if inner.index.contains_key(&key) {
            // concurrent probe or partial-reuse path created it already
            return Ok(());
        }
        let entry = Arc::new(CacheEntry::new(Arc::clone(&key), data, exec_time_ns));
        if !entry.is_empty_value() {
            let size = entry.size();
            if size > self.limit_bytes {
                return Ok(());
            }
            if !self.fits(inner, size) {
                self.make_space(inner, size)?;
            }
            if !self.fits(inner, size) {
                // everything else is pinned or in flight; stay under budget
                return Ok(());
            }
            inner.bytes_resident += size;
            entry.set_counted_bytes(size);
        }
        inner.index.insert(key, entry);
        self.stats.increment_mem_writes();
        Ok(())
    }

    /// Adds a freshly published placeholder value to the resident byte sum,
    /// evicting as needed; oversize values are dropped from the index after
    /// their waiters have been released.
    fn account_value(&self, item: &Arc<LineageItem>, entry: &Arc<CacheEntry>) {
        let size = entry.size();
        let mut inner = self.inner.lock();
        let still_ours = inner
            .index
            .get(item)
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if entry.counted_bytes() > 0 || !still_ours {
            return;
        }
        if size > self.limit_bytes {
            self.drop_placeholder_locked(&mut inner, item);
            return;
        }
        if !self.fits(&inner, size) {
            // the entry under admission sits at its probe-time position;
            // exclude it from its own eviction walk
            let prev = entry.status();
            entry.set_status(CacheStatus::Pinned);
            if let Err(e) = self.make_space(&mut inner, size) {
                warn!(error = %e, "eviction failed during admission");
            }
            entry.set_status(prev);
        }
        if !self.fits(&inner, size) {
            // waiters already received the value; stay under budget
            self.drop_placeholder_locked(&mut inner, item);
            return;
        }
        inner.bytes_resident += size;
        entry.set_counted_bytes(size);
    }

    /// Eviction-path removal: subtracts the accounted bytes and records the
    /// key for delete-hit diagnostics.
    pub(crate) fn remove_entry_locked(&self, inner: &mut EngineInner, key: &Arc<LineageItem>) {
        if let Some(entry) = inner.index.shift_remove(key) {
            inner.bytes_resident = inner.bytes_resident.saturating_sub(entry.counted_bytes());
            entry.set_counted_bytes(0);
            inner.removed.insert(Arc::clone(entry.key()));
            self.stats.increment_mem_deletes();
        }
    }

    /// Placeholder removal: no delete-hit bookkeeping.
    pub(crate) fn drop_placeholder_locked(&self, inner: &mut EngineInner, key: &Arc<LineageItem>) {
        if let Some(entry) = inner.index.shift_remove(key) {
            inner.bytes_resident = inner.bytes_resident.saturating_sub(entry.counted_bytes());
            entry.set_counted_bytes(0);
        }
    }
}

impl Drop for LineageCache {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        self.delete_spill_dir(&mut inner);
    }
}
