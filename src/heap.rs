use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::config::HeapConfig;
use crate::error::{ShellError, ShellResult};

/// A garbage-collected heap owned by exactly one core.
///
/// The scheduler guarantees at most one thread touches a heap at a time,
/// so allocation accounting needs no internal locking. The only shared
/// state is the entry counter, which exists to catch protocol violations:
/// two threads inside the same heap at once is a scheduler bug and
/// panics immediately.
#[derive(Debug)]
pub struct Heap {
    id: usize,
    config: HeapConfig,
    live_bytes: Cell<usize>,
    total_allocated: Cell<usize>,
    collections: Cell<usize>,
    entered: AtomicUsize,
}

/// Snapshot of a heap's allocation accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub live_bytes: usize,
    pub total_allocated: usize,
    pub collections: usize,
}

impl Heap {
    pub fn new(id: usize, config: HeapConfig) -> ShellResult<Self> {
        if config.collection_threshold == 0 {
            return Err(ShellError::Heap(
                "collection threshold must be nonzero".into(),
            ));
        }
        Ok(Self {
            id,
            config,
            live_bytes: Cell::new(0),
            total_allocated: Cell::new(0),
            collections: Cell::new(0),
            entered: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Registers the calling thread as actively using this heap. Every
    /// heap-touching call (task execution, core teardown) happens inside
    /// the returned scope; the registration is released on every exit
    /// path when the scope drops.
    ///
    /// Panics when another thread is already inside this heap, in every
    /// build profile.
    pub fn enter(&self) -> HeapScope<'_> {
        let previous = self.entered.fetch_add(1, Ordering::SeqCst);
        assert_eq!(
            previous, 0,
            "heap {} entered by a second thread while in use",
            self.id
        );
        trace!(heap = self.id, "heap entered");
        HeapScope { heap: self }
    }

    /// Records an allocation of `bytes`, collecting first if the live set
    /// has crossed the configured threshold.
    pub fn alloc(&self, bytes: usize) {
        debug_assert!(
            self.entered.load(Ordering::SeqCst) > 0,
            "allocation outside a heap scope"
        );
        if self.live_bytes.get() + bytes > self.config.collection_threshold {
            self.collect();
        }
        self.live_bytes.set(self.live_bytes.get() + bytes);
        self.total_allocated.set(self.total_allocated.get() + bytes);
    }

    /// Reclaims the live set. Values reachable from the running task live
    /// on the Rust heap; collection here resets the accounting that
    /// drives the threshold.
    fn collect(&self) {
        let reclaimed = self.live_bytes.replace(0);
        self.collections.set(self.collections.get() + 1);
        debug!(heap = self.id, reclaimed, "collection");
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_bytes: self.live_bytes.get(),
            total_allocated: self.total_allocated.get(),
            collections: self.collections.get(),
        }
    }
}

/// RAII guard for a heap-entered region.
#[derive(Debug)]
pub struct HeapScope<'a> {
    heap: &'a Heap,
}

impl Drop for HeapScope<'_> {
    fn drop(&mut self) {
        self.heap.entered.fetch_sub(1, Ordering::SeqCst);
        trace!(heap = self.heap.id, "heap left");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Heap {
        Heap::new(
            0,
            HeapConfig {
                collection_threshold: 64,
            },
        )
        .expect("heap")
    }

    #[test]
    fn allocation_is_accounted() {
        let heap = small_heap();
        let scope = heap.enter();
        heap.alloc(10);
        heap.alloc(20);
        drop(scope);
        let stats = heap.stats();
        assert_eq!(stats.live_bytes, 30);
        assert_eq!(stats.total_allocated, 30);
        assert_eq!(stats.collections, 0);
    }

    #[test]
    fn crossing_threshold_collects() {
        let heap = small_heap();
        let scope = heap.enter();
        heap.alloc(60);
        heap.alloc(60);
        drop(scope);
        let stats = heap.stats();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.live_bytes, 60);
        assert_eq!(stats.total_allocated, 120);
    }

    #[test]
    fn scope_can_be_reentered_sequentially() {
        let heap = small_heap();
        drop(heap.enter());
        drop(heap.enter());
    }

    #[test]
    #[should_panic(expected = "entered by a second thread")]
    fn concurrent_entry_panics() {
        let heap = small_heap();
        let _outer = heap.enter();
        let _inner = heap.enter();
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert!(Heap::new(
            0,
            HeapConfig {
                collection_threshold: 0
            }
        )
        .is_err());
    }
}
