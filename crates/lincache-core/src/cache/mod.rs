//! Caching layer: engine, entries, admission, eviction, spill store, and
//! function-scope reuse.
//!
//! # Public Types
//!
//! - [`LineageCache`]: the engine
//! - [`CacheEntry`], [`CacheStatus`]: entries and their lifecycle
//! - [`RewriteReuse`]: seam to the external partial-reuse rewrite engine

pub mod admission;
mod engine;
mod entry;
mod eviction;
mod multilevel;
mod spill;

pub use engine::{LineageCache, RewriteReuse};
pub use entry::{CacheEntry, CacheStatus};


#[cfg(test)]
mod concurrency_tests;

#[cfg(test)]
mod eviction_tests;
