//! # LinCache Core
//!
//! Lineage-keyed computation reuse cache for matrix-program runtimes.
//!
//! Before a runtime executes an instruction it probes the cache with the
//! instruction's lineage DAG; on a hit the cached artifact is rebound to the
//! output variable and re-execution is skipped. Misses install a placeholder
//! entry so that concurrent threads compute each distinct lineage at most
//! once.
//!
//! ## Features
//!
//! - **Structural lineage keys**: immutable DAGs with construction-time
//!   memoized hashing and cycle-safe equality
//! - **Cost-based eviction**: four policies (`lru`, `costnsize`, `dagheight`,
//!   `hybrid`) deciding evict-vs-spill per entry
//! - **Spill-to-disk**: evicted matrix blobs move to a transient working
//!   directory and rehydrate on demand
//! - **Function-scope reuse**: all-or-nothing caching of multi-output calls
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lincache_core::{CacheConfig, ExecutionContext, LineageCache};
//!
//! let cache = LineageCache::new(CacheConfig::default())?;
//! let mut ctx = ExecutionContext::new();
//!
//! if !cache.reuse_instruction(&inst, &mut ctx) {
//!     let elapsed = execute(&inst, &mut ctx);
//!     cache.put_value(&inst, &ctx, elapsed);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod context;
pub mod cost;
pub mod data;
pub mod error;
pub mod instruction;
pub mod lineage;
pub mod stats;

pub use cache::{CacheEntry, CacheStatus, LineageCache, RewriteReuse};
pub use config::{CacheConfig, EvictionPolicy, ReuseCacheType};
pub use context::ExecutionContext;
pub use cost::{IoCostEstimator, StaticBandwidthModel};
pub use data::{Data, MatrixBlock, ScalarObject};
pub use error::{Error, Result};
pub use instruction::{Instruction, Operand};
pub use lineage::{LineageItem, LineageItemType};
pub use stats::StatsSnapshot;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod cost_tests;
