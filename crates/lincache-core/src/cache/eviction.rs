//! Cost-based eviction.
//!
//! `make_space` walks resident entries in strict LRU order (front of the
//! index first). The active policy contributes a keep-predicate applied in
//! a first pass; a second unrestricted pass runs only when the first could
//! not free enough space, so admission never fails while evictable entries
//! remain. Per-entry fate follows the spill/drop decision table.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::engine::{EngineInner, LineageCache};
use crate::config::EvictionPolicy;
use crate::cost;
use crate::data::Data;
use crate::error::Result;
use crate::lineage::{self, LineageItem};

/// Entries produced (or spillable) in under this time are not worth
/// keeping or spilling.
const CHEAP_MS: f64 = 100.0;

impl LineageCache {
    /// Evicts or spills LRU entries until `need` more bytes fit under the
    /// budget.
    pub(crate) fn make_space(&self, inner: &mut EngineInner, need: u64) -> Result<()> {
        if self.fits(inner, need) {
            return Ok(());
        }
        self.evict_pass(inner, need, true)?;
        if !self.fits(inner, need) {
            self.evict_pass(inner, need, false)?;
        }
        Ok(())
    }

    fn evict_pass(&self, inner: &mut EngineInner, need: u64, apply_policy: bool) -> Result<()> {
        let keep = if apply_policy {
            KeepFilter::build(self, inner)
        } else {
            KeepFilter::none()
        };
        let candidates: Vec<Arc<LineageItem>> = inner.index.keys().cloned().collect();
        for key in candidates {
            if self.fits(inner, need) {
                break;
            }
            let Some(entry) = inner.index.get(&key).cloned() else {
                continue;
            };
            if !entry.status().can_evict() {
                // placeholders under execution, pinned entries
                continue;
            }
            if keep.keeps(&key) {
                continue;
            }
            if !self.config().spill_enabled {
                self.remove_entry_locked(inner, &key);
                continue;
            }
            if !entry.is_matrix_value() {
                // cheap scalars go; expensive ones can feed function-scope
                // reuse and stay resident
                if entry.exec_time_ms() < CHEAP_MS {
                    self.remove_entry_locked(inner, &key);
                }
                continue;
            }
            let Some(Data::Matrix(mb)) = entry.try_value() else {
                continue;
            };
            let t0 = Instant::now();
            let spill_ms = cost::spill_time_ms(&mb, self.io_cost());
            self.statistics().add_costing_time(t0.elapsed());
            let exec_ms = entry.exec_time_ms();
            let do_spill = if spill_ms < CHEAP_MS {
                exec_ms >= CHEAP_MS
            } else {
                exec_ms > spill_ms
            };
            if do_spill {
                self.spill_to_disk(inner, &key, &entry)?;
            }
            self.remove_entry_locked(inner, &key);
        }
        Ok(())
    }
}

/// Policy keep-predicate over one eviction pass.
///
/// Entries scoring strictly above the mean of the evictable population are
/// kept; with uniform scores the pass degenerates to plain LRU.
struct KeepFilter {
    scores: Option<FxHashMap<u64, f64>>,
    mean: f64,
}

impl KeepFilter {
    fn none() -> Self {
        Self {
            scores: None,
            mean: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn build(cache: &LineageCache, inner: &EngineInner) -> Self {
        let policy = cache.config().policy;
        if policy == EvictionPolicy::Lru {
            return Self::none();
        }

        let total = inner.index.len().max(1);
        let mut raw: Vec<(u64, f64, f64, f64)> = Vec::new();
        for (rank, (key, entry)) in inner.index.iter().enumerate() {
            if !entry.status().can_evict() {
                continue;
            }
            let size = entry.size().max(1);
            let cost_per_byte = entry.exec_time_ms() / size as f64;
            let height = f64::from(lineage::dag_height(key));
            let recency = (rank + 1) as f64 / total as f64;
            raw.push((key.id(), recency, cost_per_byte, height));
        }
        if raw.is_empty() {
            return Self::none();
        }

        let max_cost = raw.iter().map(|r| r.2).fold(f64::MIN_POSITIVE, f64::max);
        let max_height = raw.iter().map(|r| r.3).fold(1.0, f64::max);
        let weights = cache.config().hybrid_weights;
        let scores: FxHashMap<u64, f64> = raw
            .iter()
            .map(|&(id, recency, cost_per_byte, height)| {
                let score = match policy {
                    EvictionPolicy::CostNSize => cost_per_byte / max_cost,
                    EvictionPolicy::DagHeight => height / max_height,
                    _ => {
                        weights.recency * recency
                            + weights.cost_size * (cost_per_byte / max_cost)
                            + weights.height * (height / max_height)
                    }
                };
                (id, score)
            })
            .collect();
        let mean = scores.values().sum::<f64>() / scores.len() as f64;
        Self {
            scores: Some(scores),
            mean,
        }
    }

    fn keeps(&self, key: &Arc<LineageItem>) -> bool {
        match &self.scores {
            None => false,
            Some(scores) => scores.get(&key.id()).is_some_and(|s| *s > self.mean),
        }
    }
}
