use std::{
    fmt,
    sync::atomic::{AtomicIsize, Ordering},
};

/// A counter shared between threads, updated with atomic operations only.
pub struct InternalCounter {
    value: AtomicIsize,
}

impl InternalCounter {
    /// Creates a counter with value 0.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        InternalCounter {
            value: AtomicIsize::new(0),
        }
    }

    /// Get the counter's value.
    #[inline]
    pub fn read(&self) -> isize {
        self.value.load(Ordering::Relaxed)
    }

    /// Get and reset the counter's value.
    #[inline]
    pub fn take(&self) -> isize {
        self.value.swap(0, Ordering::Relaxed)
    }

    /// Increment the counter by the provided amount.
    #[inline]
    pub fn add(&self, val: isize) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    /// Decrement the counter by the provided amount.
    #[inline]
    pub fn sub(&self, val: isize) {
        self.value.fetch_sub(val, Ordering::Relaxed);
    }
}

impl Default for InternalCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InternalCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read().fmt(f)
    }
}

/// Video memory allocated by the profiler, per heap.
///
/// Every queue of a device updates the same counters.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    heaps: [InternalCounter; hal::GpuHeap::COUNT],
    allocations: InternalCounter,
}

impl MemoryCounters {
    pub fn allocated(&self, heap: hal::GpuHeap, size: hal::MemoryAddress) {
        self.heaps[heap.index()].add(size as isize);
        self.allocations.add(1);
    }

    pub fn freed(&self, heap: hal::GpuHeap, size: hal::MemoryAddress) {
        self.heaps[heap.index()].sub(size as isize);
        self.allocations.sub(1);
    }

    /// Bytes currently allocated from `heap`.
    pub fn heap_bytes(&self, heap: hal::GpuHeap) -> isize {
        self.heaps[heap.index()].read()
    }

    pub fn allocation_count(&self) -> isize {
        self.allocations.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn concurrent_updates() {
        let counters = Arc::new(MemoryCounters::default());
        let workers = (0..4)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.allocated(hal::GpuHeap::GartUswc, 0x1000);
                    }
                    for _ in 0..500 {
                        counters.freed(hal::GpuHeap::GartUswc, 0x1000);
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(counters.heap_bytes(hal::GpuHeap::GartUswc), 4 * 500 * 0x1000);
        assert_eq!(counters.heap_bytes(hal::GpuHeap::Local), 0);
        assert_eq!(counters.allocation_count(), 4 * 500);
    }

    #[test]
    fn take_resets() {
        let counter = InternalCounter::new();
        counter.add(5);
        counter.sub(2);
        assert_eq!(counter.take(), 3);
        assert_eq!(counter.read(), 0);
    }
}
