//! Cache entries and their per-entry value monitor.
//!
//! The value inside an entry is guarded by its own mutex and condvar so
//! producers can publish without holding the engine lock, and consumers of
//! an in-flight placeholder block until the single producer publishes.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::data::Data;
use crate::lineage::LineageItem;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Placeholder awaiting its producer.
    Empty,
    /// Valued and resident.
    Cached,
    /// Valued after rehydration from disk.
    Reloaded,
    /// Under active function/statement-block execution; must not be evicted.
    Pinned,
}

impl CacheStatus {
    /// Whether eviction may remove an entry in this status.
    #[must_use]
    pub fn can_evict(self) -> bool {
        matches!(self, Self::Cached | Self::Reloaded)
    }
}

#[derive(Debug)]
struct EntryState {
    data: Option<Data>,
    exec_time_ns: u64,
    status: CacheStatus,
    orig_item: Option<Arc<LineageItem>>,
    /// Bytes this entry currently contributes to the engine's resident sum.
    counted_bytes: u64,
}

/// One cached computation result, keyed by its lineage.
#[derive(Debug)]
pub struct CacheEntry {
    key: Arc<LineageItem>,
    state: Mutex<EntryState>,
    avail: Condvar,
}

impl CacheEntry {
    pub(crate) fn new(key: Arc<LineageItem>, data: Option<Data>, exec_time_ns: u64) -> Self {
        let status = if data.is_some() {
            CacheStatus::Cached
        } else {
            CacheStatus::Empty
        };
        Self {
            key,
            state: Mutex::new(EntryState {
                data,
                exec_time_ns,
                status,
                orig_item: None,
                counted_bytes: 0,
            }),
            avail: Condvar::new(),
        }
    }

    /// The lineage key.
    #[must_use]
    pub fn key(&self) -> &Arc<LineageItem> {
        &self.key
    }

    /// Returns the value, blocking until a producer publishes it.
    ///
    /// A waiter is released only by [`set_value`](Self::set_value); callers
    /// must not hold the engine lock here.
    #[must_use]
    pub fn get_value(&self) -> Data {
        let mut st = self.state.lock();
        loop {
            if let Some(data) = &st.data {
                return data.clone();
            }
            self.avail.wait(&mut st);
        }
    }

    /// Returns the value if already published.
    #[must_use]
    pub fn try_value(&self) -> Option<Data> {
        self.state.lock().data.clone()
    }

    /// Publishes the value and wakes all waiting consumers.
    pub(crate) fn set_value(&self, data: Data, exec_time_ns: u64) {
        let mut st = self.state.lock();
        st.data = Some(data);
        st.exec_time_ns = exec_time_ns;
        if st.status == CacheStatus::Empty {
            st.status = CacheStatus::Cached;
        }
        self.avail.notify_all();
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        self.state.lock().status
    }

    pub(crate) fn set_status(&self, status: CacheStatus) {
        self.state.lock().status = status;
    }

    /// Measured or estimated wall time to produce the value, in
    /// nanoseconds.
    #[must_use]
    pub fn exec_time_ns(&self) -> u64 {
        self.state.lock().exec_time_ns
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn exec_time_ms(&self) -> f64 {
        self.exec_time_ns() as f64 / 1_000_000.0
    }

    /// In-memory size of the value; 0 while awaiting the producer.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.state
            .lock()
            .data
            .as_ref()
            .map_or(0, Data::in_memory_size)
    }

    /// True while no producer has published a value.
    #[must_use]
    pub fn is_empty_value(&self) -> bool {
        self.state.lock().data.is_none()
    }

    /// True when the published value is a matrix.
    #[must_use]
    pub fn is_matrix_value(&self) -> bool {
        matches!(self.state.lock().data, Some(Data::Matrix(_)))
    }

    /// The upstream lineage this entry was cloned from during function-scope
    /// reuse, if any.
    #[must_use]
    pub fn orig_item(&self) -> Option<Arc<LineageItem>> {
        self.state.lock().orig_item.clone()
    }

    pub(crate) fn set_orig_item(&self, item: Arc<LineageItem>) {
        self.state.lock().orig_item = Some(item);
    }

    pub(crate) fn counted_bytes(&self) -> u64 {
        self.state.lock().counted_bytes
    }

    pub(crate) fn set_counted_bytes(&self, bytes: u64) {
        self.state.lock().counted_bytes = bytes;
    }
}
