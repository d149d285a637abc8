//! Environment queries the harness treats as opaque: heap usage, collector
//! time, collection requests and the preferred vector width.
//!
//! [`NativeHost`] answers them for a plain Rust process. Heap usage comes from
//! [`TrackingAllocator`], which the `parabench` binary installs as its global
//! allocator. Rust frees memory deterministically, so there is no tracing
//! collector: [`Host::request_gc`] is only a settle point and
//! [`Host::gc_time`] stays zero.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
    sync::{
        OnceLock,
        atomic::{AtomicIsize, AtomicUsize, Ordering},
    },
    time::Duration,
};

use crossbeam::utils::CachePadded;

pub trait Host: Send + Sync {
    /// Bytes currently allocated on the heap.
    fn heap_used_bytes(&self) -> u64;
    /// Cumulative time spent collecting garbage since process start.
    fn gc_time(&self) -> Duration;
    /// Asks the host to return memory to baseline.
    fn request_gc(&self);
    /// Number of `f32` lanes the CPU prefers for vector arithmetic.
    fn vector_width(&self) -> usize;
    /// Human readable name of the allocator / collector in use.
    fn allocator_name(&self) -> String;
}

/// Global allocator wrapper that keeps a live byte count.
///
/// The library does not install it. Binaries opt in with
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: parabench::host::TrackingAllocator = parabench::host::TrackingAllocator;
/// ```
///
/// The count is spread over [`HEAP_SHARDS`] cache-padded counters picked per
/// thread, so allocating workers do not all hit one atomic.
pub struct TrackingAllocator;

/// Number of per-thread counter shards behind [`tracked_heap_bytes`].
pub const HEAP_SHARDS: usize = 64;

static HEAP_BYTES: [CachePadded<AtomicIsize>; HEAP_SHARDS] =
    [const { CachePadded::new(AtomicIsize::new(0)) }; HEAP_SHARDS];
static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    // Const-initialized and drop-free, so reading it never allocates.
    static SHARD: Cell<usize> = const { Cell::new(usize::MAX) };
}

fn shard() -> &'static AtomicIsize {
    let index = SHARD
        .try_with(|slot| {
            let mut index = slot.get();
            if index == usize::MAX {
                index = NEXT_SHARD.fetch_add(1, Ordering::Relaxed) % HEAP_SHARDS;
                slot.set(index);
            }
            index
        })
        .unwrap_or(0);
    &HEAP_BYTES[index]
}

fn track(delta: isize) {
    shard().fetch_add(delta, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            track(layout.size() as isize);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        track(-(layout.size() as isize));
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            track(layout.size() as isize);
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, old_layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, old_layout, new_size) };
        if !new_ptr.is_null() {
            track(new_size as isize - old_layout.size() as isize);
        }
        new_ptr
    }
}

#[cfg(test)]
#[global_allocator]
static TEST_ALLOCATOR: TrackingAllocator = TrackingAllocator;

/// Live heap bytes as seen by [`TrackingAllocator`].
///
/// Always 0 when the running binary has not installed it. A block freed on
/// another thread than the one that allocated it moves bytes between shards,
/// so single shards may go negative; only the sum is meaningful.
pub fn tracked_heap_bytes() -> u64 {
    let total: isize = HEAP_BYTES
        .iter()
        .map(|shard| shard.load(Ordering::Relaxed))
        .sum();
    total.max(0) as u64
}

/// Preferred `f32` lane count, detected once.
pub fn preferred_vector_width() -> usize {
    static WIDTH: OnceLock<usize> = OnceLock::new();
    *WIDTH.get_or_init(detect_vector_width)
}

#[cfg(target_arch = "x86_64")]
fn detect_vector_width() -> usize {
    if std::arch::is_x86_feature_detected!("avx512f") {
        16
    } else if std::arch::is_x86_feature_detected!("avx2") {
        8
    } else {
        4
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_vector_width() -> usize {
    // NEON and most other 128-bit SIMD units
    4
}

/// Host readings for a plain Rust process.
///
/// Heap readings come from [`tracked_heap_bytes`] and are only meaningful
/// when [`TrackingAllocator`] is the global allocator; otherwise they stay 0.
/// There is no collector, so [`Host::gc_time`] is always zero.
#[derive(Debug, Default)]
pub struct NativeHost;

impl NativeHost {
    pub fn new() -> Self {
        Self
    }
}

impl Host for NativeHost {
    fn heap_used_bytes(&self) -> u64 {
        tracked_heap_bytes()
    }

    fn gc_time(&self) -> Duration {
        Duration::ZERO
    }

    /// Memory is freed eagerly, so this is only a settle point: it yields and
    /// lets the caller's pause do the rest.
    fn request_gc(&self) {
        std::thread::yield_now();
    }

    fn vector_width(&self) -> usize {
        preferred_vector_width()
    }

    fn allocator_name(&self) -> String {
        "system allocator (tracked, no tracing collector)".to_string()
    }
}
