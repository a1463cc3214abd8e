//! Eviction tests: decision table, status skips, and policy behavior.

use super::*;
use crate::config::{CacheConfig, EvictionPolicy};
use crate::context::ExecutionContext;
use crate::cost::IoCostEstimator;
use crate::data::{Data, MatrixBlock, ScalarObject};
use crate::instruction::{Instruction, Operand};
use crate::lineage::LineageItem;
use std::sync::Arc;
use tempfile::TempDir;

/// IO model with a fixed per-direction time, independent of shape.
struct FixedIo {
    seconds_each_way: f64,
}

impl IoCostEstimator for FixedIo {
    fn fs_write_time(&self, _: u64, _: u64, _: f64) -> f64 {
        self.seconds_each_way
    }
    fn fs_read_time(&self, _: u64, _: u64, _: f64) -> f64 {
        self.seconds_each_way
    }
}

fn test_config(limit: u64, workdir: &TempDir) -> CacheConfig {
    CacheConfig {
        max_memory_bytes: Some(limit * 20),
        cache_fraction: 0.05,
        workdir: workdir.path().to_path_buf(),
        policy: EvictionPolicy::Lru,
        ..CacheConfig::default()
    }
}

fn block_of_size(size: u64) -> Arc<MatrixBlock> {
    let payload = usize::try_from(size - 40).unwrap();
    Arc::new(MatrixBlock::new(
        1,
        payload as u64 / 8,
        payload as u64 / 8,
        vec![7u8; payload],
    ))
}

fn input_chain(tag: &str, depth: usize) -> Arc<LineageItem> {
    let mut cur = LineageItem::literal(tag);
    for _ in 0..depth {
        cur = LineageItem::instruction("r'", vec![cur]);
    }
    cur
}

fn put_block(cache: &LineageCache, tag: &str, depth: usize, size: u64, exec_ms: u64) {
    let input = format!("{tag}_in");
    let output = format!("{tag}_out");
    let mut ctx = ExecutionContext::new();
    ctx.lineage_mut().set(input.clone(), input_chain(tag, depth));
    ctx.set_variable(output.clone(), Data::Matrix(block_of_size(size)));
    let inst = Instruction::new("tsmm", vec![Operand::matrix(input.as_str())], Operand::matrix(output.as_str()));
    cache.put(&inst, &ctx, exec_ms * 1_000_000);
}

/// Probes the key of [`put_block`]; counts a memory or disk hit on success.
fn probe_hit(cache: &LineageCache, tag: &str, depth: usize) -> bool {
    let input = format!("{tag}_in");
    let mut ctx = ExecutionContext::new();
    ctx.lineage_mut().set(input.clone(), input_chain(tag, depth));
    let inst = Instruction::new(
        "tsmm",
        vec![Operand::matrix(input.as_str())],
        Operand::matrix(format!("{tag}_out")),
    );
    cache.reuse_instruction(&inst, &mut ctx)
}

// ========== Decision table ==========

#[test]
fn test_cheap_spill_expensive_exec_spills() {
    let dir = TempDir::new().unwrap();
    let cache = LineageCache::new(test_config(10_000, &dir))
        .unwrap()
        .with_io_cost(Arc::new(FixedIo {
            seconds_each_way: 0.025, // 50 ms round trip
        }));
    put_block(&cache, "A", 0, 4_000, 500);
    put_block(&cache, "B", 0, 4_000, 500);
    put_block(&cache, "C", 0, 4_000, 500);

    assert_eq!(cache.spilled_len(), 1);
    assert_eq!(cache.bytes_resident(), 8_000);
    assert_eq!(cache.stats().fs_writes, 1);
}

#[test]
fn test_cheap_spill_cheap_exec_drops() {
    let dir = TempDir::new().unwrap();
    let cache = LineageCache::new(test_config(10_000, &dir))
        .unwrap()
        .with_io_cost(Arc::new(FixedIo {
            seconds_each_way: 0.025,
        }));
    put_block(&cache, "A", 0, 4_000, 50);
    put_block(&cache, "B", 0, 4_000, 50);
    put_block(&cache, "C", 0, 4_000, 50);

    assert_eq!(cache.spilled_len(), 0);
    assert!(!probe_hit(&cache, "A", 0));
    assert_eq!(cache.stats().del_hits, 1);
}

#[test]
fn test_expensive_spill_spills_only_when_exec_dominates() {
    let dir = TempDir::new().unwrap();
    // 400 ms round trip
    let io = Arc::new(FixedIo {
        seconds_each_way: 0.2,
    });

    let cache = LineageCache::new(test_config(10_000, &dir))
        .unwrap()
        .with_io_cost(Arc::clone(&io) as Arc<dyn IoCostEstimator>);
    put_block(&cache, "A", 0, 4_000, 500); // exec > spill: spill
    put_block(&cache, "B", 0, 4_000, 500);
    put_block(&cache, "C", 0, 4_000, 500);
    assert_eq!(cache.spilled_len(), 1);

    let dir2 = TempDir::new().unwrap();
    let cache2 = LineageCache::new(test_config(10_000, &dir2))
        .unwrap()
        .with_io_cost(io);
    put_block(&cache2, "A", 0, 4_000, 150); // exec <= spill: drop
    put_block(&cache2, "B", 0, 4_000, 150);
    put_block(&cache2, "C", 0, 4_000, 150);
    assert_eq!(cache2.spilled_len(), 0);
}

#[test]
fn test_spill_disabled_drops_everything() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        spill_enabled: false,
        ..test_config(10_000, &dir)
    };
    let cache = LineageCache::new(config).unwrap();
    put_block(&cache, "A", 0, 4_000, 500);
    put_block(&cache, "B", 0, 4_000, 500);
    put_block(&cache, "C", 0, 4_000, 500);

    assert_eq!(cache.spilled_len(), 0);
    assert_eq!(cache.stats().mem_deletes, 1);
    assert!(!probe_hit(&cache, "A", 0));
    assert_eq!(cache.stats().del_hits, 1);
}

// ========== Status skips ==========

#[test]
fn test_placeholders_survive_eviction() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        spill_enabled: false,
        ..test_config(10_000, &dir)
    };
    let cache = LineageCache::new(config).unwrap();

    // placeholder lands at the LRU end once the valued entries arrive
    let ph_key = input_chain("pending", 1);
    assert!(cache.reuse_item(&ph_key).unwrap().is_none());
    put_block(&cache, "A", 0, 4_000, 500);
    put_block(&cache, "B", 0, 4_000, 500);
    put_block(&cache, "C", 0, 4_000, 500);

    assert!(cache.probe(&ph_key));
    assert!(!probe_hit(&cache, "A", 0));
}

#[test]
fn test_pinned_entries_survive_eviction() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        spill_enabled: false,
        ..test_config(10_000, &dir)
    };
    let cache = LineageCache::new(config).unwrap();
    put_block(&cache, "A", 0, 4_000, 500);
    let a_key = LineageItem::instruction("tsmm", vec![input_chain("A", 0)]);
    cache.pin(&a_key);

    put_block(&cache, "B", 0, 4_000, 500);
    put_block(&cache, "C", 0, 4_000, 500);

    assert!(cache.probe(&a_key));
    assert!(!probe_hit(&cache, "B", 0));

    cache.unpin(&a_key);
    put_block(&cache, "D", 0, 4_000, 500);
    assert!(!probe_hit(&cache, "A", 0));
}

#[test]
fn test_cheap_scalars_drop_expensive_scalars_stay() {
    let dir = TempDir::new().unwrap();
    let cache = LineageCache::new(test_config(10_000, &dir))
        .unwrap()
        .with_io_cost(Arc::new(FixedIo {
            seconds_each_way: 0.025,
        }));

    for (tag, exec_ms) in [("cheap", 10u64), ("dear", 500u64)] {
        let mut ctx = ExecutionContext::new();
        ctx.lineage_mut().set("X", input_chain(tag, 0));
        let inst = Instruction::new("nrow", vec![Operand::matrix("X")], Operand::scalar("n"));
        assert!(!cache.reuse_instruction(&inst, &mut ctx));
        ctx.set_variable("n", Data::Scalar(ScalarObject::I64(42)));
        cache.put_value(&inst, &ctx, exec_ms * 1_000_000);
    }

    put_block(&cache, "A", 0, 6_000, 500);
    put_block(&cache, "B", 0, 6_000, 500); // forces a walk past both scalars

    let cheap_key = LineageItem::instruction("nrow", vec![input_chain("cheap", 0)]);
    let dear_key = LineageItem::instruction("nrow", vec![input_chain("dear", 0)]);
    assert!(!cache.probe(&cheap_key));
    assert!(cache.probe(&dear_key));
}

// ========== Policy comparison ==========

/// Fixed workload: one expensive deep-lineage entry, cheap shallow fillers,
/// then space pressure and a probe of the expensive entry.
fn run_policy_workload(policy: EvictionPolicy) -> (u64, u64) {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        policy,
        spill_enabled: false,
        ..test_config(10_000, &dir)
    };
    let cache = LineageCache::new(config).unwrap();

    put_block(&cache, "hot", 4, 3_000, 500);
    put_block(&cache, "f1", 0, 3_000, 1);
    put_block(&cache, "f2", 0, 3_000, 1);
    put_block(&cache, "f3", 0, 3_000, 1); // exceeds the budget, evicts

    let hit = probe_hit(&cache, "hot", 4);
    let stats = cache.stats();
    (u64::from(hit), stats.mem_deletes)
}

#[test]
fn test_costnsize_beats_lru_on_reference_workload() {
    let (lru_hits, lru_deletes) = run_policy_workload(EvictionPolicy::Lru);
    let (cost_hits, cost_deletes) = run_policy_workload(EvictionPolicy::CostNSize);
    assert!(cost_hits > lru_hits);
    assert!(lru_deletes >= cost_deletes);
}

#[test]
fn test_dagheight_beats_lru_on_reference_workload() {
    let (lru_hits, _) = run_policy_workload(EvictionPolicy::Lru);
    let (dag_hits, _) = run_policy_workload(EvictionPolicy::DagHeight);
    assert!(dag_hits > lru_hits);
}

// ========== Admission soundness ==========

#[test]
fn test_resident_bytes_match_entry_sizes_under_churn() {
    let dir = TempDir::new().unwrap();
    let cache = LineageCache::new(test_config(20_000, &dir))
        .unwrap()
        .with_io_cost(Arc::new(FixedIo {
            seconds_each_way: 0.025,
        }));

    for i in 0..30u64 {
        let tag = format!("t{i}");
        let size = 1_000 + (i % 7) * 600;
        let exec = if i % 3 == 0 { 500 } else { 20 };
        put_block(&cache, &tag, (i % 4) as usize, size, exec);
        if i % 5 == 0 {
            let _ = probe_hit(&cache, &tag, (i % 4) as usize);
        }
    }

    let inner = cache.inner_lock();
    let sum: u64 = inner.index.values().map(|e| e.counted_bytes()).sum();
    assert_eq!(inner.bytes_resident, sum);
    assert!(inner.bytes_resident <= cache.limit_bytes());
}
