//! Block heap with thread-local bump arenas.
//!
//! The heap is carved into fixed-size blocks. Every thread owns a
//! [`HeapProxy`] that bump-allocates inside its current block and only
//! touches shared state when the block runs out. Collection is delegated to
//! a [`Collector`] supplied by the embedder: this crate triggers it from the
//! slow path and hands it the allocating thread's roots, nothing more.
//!
//! Consumers provide:
//! - A [`TraceFn`] to enumerate Value edges of heap objects.
//! - A [`RootProvider`] to supply live roots at GC time.
//! - A [`Collector`] that decides which blocks to reclaim.

use std::{
    alloc::Layout,
    ops::Deref,
    ptr::{self, NonNull},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{debug, trace};
use object::Value;
use parking_lot::Mutex;

use crate::{OS_PAGE_SIZE, system};

// ── Public API types ──────────────────────────────────────────────────

/// Function that traces all Value edges of a heap object.
///
/// Given a pointer to a heap object (whose first bytes are an [`object::Header`]),
/// the function must call `visitor` for every [`Value`] field that may be a heap
/// reference. The visitor may mutate the Value in place (e.g. for compaction).
///
/// # Safety
///
/// `obj` must point to a valid, live heap object with a valid header.
pub type TraceFn = unsafe fn(obj: *const u8, visitor: &mut dyn FnMut(&mut Value));

/// Consumers implement this to provide GC roots.
///
/// The visitor receives `&mut Value` so a relocating collector can rewrite
/// root slots in place. Anything the mutator holds across an allocation
/// must be reachable through this, or reloaded afterwards.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

/// The collection algorithm, supplied by the embedder.
///
/// Invoked from an arena's slow path when the heap has no free block left.
/// Reclaimed blocks are handed back with [`HeapInner::release_block`].
pub trait Collector: Send + Sync {
    fn collect(&self, heap: &HeapInner, roots: &mut dyn RootProvider);
}

/// A collector that never reclaims anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCollector;

impl Collector for NoCollector {
    fn collect(&self, _heap: &HeapInner, _roots: &mut dyn RootProvider) {}
}

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("sizes must be > 0")]
    ZeroSize,
    #[error("block_size must be a multiple of the OS page size ({OS_PAGE_SIZE})")]
    BlockAlignment,
    #[error("heap_size must be a multiple of block_size")]
    HeapNotBlockMultiple,
    #[error("large_size must be smaller or equal to block_size")]
    LargeSizeTooBig,
}

/// Configuration for the block heap.
#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Total size of the heap in bytes. Must be a multiple of `block_size`.
    pub heap_size: usize,
    /// Size of a Block, the unit an arena takes from the shared heap.
    pub block_size: usize,
    /// Objects of at least this size bypass the arena and get their own
    /// mapping.
    pub large_size: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            heap_size: 67_108_864, // 64 MB
            block_size: 32_768,    // 32 KB
            large_size: 8_176,     // 8 KB - 16
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.heap_size == 0 || self.block_size == 0 || self.large_size == 0
        {
            return Err(SettingsError::ZeroSize);
        }
        if !self.block_size.is_multiple_of(OS_PAGE_SIZE) {
            return Err(SettingsError::BlockAlignment);
        }
        if !self.heap_size.is_multiple_of(self.block_size) {
            return Err(SettingsError::HeapNotBlockMultiple);
        }
        if self.large_size > self.block_size {
            return Err(SettingsError::LargeSizeTooBig);
        }
        Ok(())
    }
}

// ── Shared heap ───────────────────────────────────────────────────────

/// Sentinel for "no block".
pub const NO_BLOCK: usize = usize::MAX;

#[derive(Debug, Default)]
pub struct HeapStats {
    pub collections: AtomicUsize,
    pub blocks_handed_out: AtomicUsize,
    pub large_allocations: AtomicUsize,
}

#[derive(Debug)]
struct LargeAllocation {
    start: NonNull<u8>,
    size: usize,
}

pub struct HeapInner {
    pub settings: HeapSettings,
    pub stats: HeapStats,
    heap_start: NonNull<u8>,
    block_count: usize,
    /// Blocks nobody owns. Popped from the back.
    free_blocks: Mutex<Vec<usize>>,
    /// Blocks retired by an arena, reclaimable by the collector.
    retired_blocks: Mutex<Vec<usize>>,
    large_objects: Mutex<Vec<LargeAllocation>>,
    /// Live arenas. A collector only ever sees one arena's roots.
    proxies: AtomicUsize,
    collector: Box<dyn Collector>,
    trace_fn: TraceFn,
}

// SAFETY: the raw heap pointer is only dereferenced through blocks handed
// out under the block-list locks.
unsafe impl Send for HeapInner {}
// SAFETY: see above
unsafe impl Sync for HeapInner {}

impl std::fmt::Debug for HeapInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapInner")
            .field("settings", &self.settings)
            .field("block_count", &self.block_count)
            .field("free_blocks", &self.free_block_count())
            .field("stats", &self.stats)
            .finish()
    }
}

impl HeapInner {
    fn new(
        settings: HeapSettings,
        trace_fn: TraceFn,
        collector: Box<dyn Collector>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let heap_start = system::map_memory(settings.heap_size)
            .unwrap_or_else(|| {
                panic!("failed to map {} bytes for the heap", settings.heap_size)
            });
        let block_count = settings.heap_size / settings.block_size;
        // reversed so arenas take low addresses first
        let free_blocks = (0..block_count).rev().collect();

        debug!(
            "heap mapped: {} blocks of {} bytes",
            block_count, settings.block_size
        );

        Ok(Self {
            settings,
            stats: HeapStats::default(),
            heap_start,
            block_count,
            free_blocks: Mutex::new(free_blocks),
            retired_blocks: Mutex::new(Vec::new()),
            large_objects: Mutex::new(Vec::new()),
            proxies: AtomicUsize::new(0),
            collector,
            trace_fn,
        })
    }

    #[inline]
    pub fn trace_fn(&self) -> TraceFn {
        self.trace_fn
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn free_block_count(&self) -> usize {
        self.free_blocks.lock().len()
    }

    /// Arenas currently allocating from this heap.
    #[inline]
    pub fn proxy_count(&self) -> usize {
        self.proxies.load(Ordering::Acquire)
    }

    pub fn large_object_count(&self) -> usize {
        self.large_objects.lock().len()
    }

    /// Takes a block nobody owns, or [`None`] if the heap is exhausted.
    pub fn request_block(&self) -> Option<usize> {
        let block = self.free_blocks.lock().pop()?;
        self.stats.blocks_handed_out.fetch_add(1, Ordering::Relaxed);
        Some(block)
    }

    /// Marks a block as filled by an arena.
    pub fn retire_block(&self, block: usize) {
        debug_assert!(block < self.block_count);
        self.retired_blocks.lock().push(block);
    }

    /// Blocks currently retired, for a collector to inspect.
    pub fn retired_blocks(&self) -> Vec<usize> {
        self.retired_blocks.lock().clone()
    }

    /// Returns a retired block to the free list. Called by collectors once
    /// nothing live remains in it.
    pub fn release_block(&self, block: usize) {
        let mut retired = self.retired_blocks.lock();
        if let Some(pos) = retired.iter().position(|&b| b == block) {
            retired.swap_remove(pos);
            self.free_blocks.lock().push(block);
        } else {
            panic!("release of block {block} that was never retired");
        }
    }

    /// Start and end address of `block`.
    pub fn block_bounds(&self, block: usize) -> (*mut u8, *mut u8) {
        assert!(block < self.block_count, "block {block} out of range");
        let size = self.settings.block_size;
        // SAFETY: block index is inside the mapping
        unsafe {
            let start = self.heap_start.as_ptr().add(block * size);
            (start, start.add(size))
        }
    }

    /// Whether `ptr` lies inside the block region (large objects excluded).
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.heap_start.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + self.settings.heap_size
    }

    /// Unmaps every large object `is_live` rejects and returns how many
    /// were freed.
    pub fn sweep_large_objects(&self, is_live: impl Fn(*const u8) -> bool) -> usize {
        let mut freed = 0;
        self.large_objects.lock().retain(|large| {
            if is_live(large.start.as_ptr()) {
                return true;
            }
            system::unmap_memory(large.start, large.size);
            freed += 1;
            false
        });
        freed
    }

    fn allocate_large(&self, layout: Layout) -> NonNull<u8> {
        let size = layout.size().next_multiple_of(OS_PAGE_SIZE);
        let start = system::map_memory(size).unwrap_or_else(|| {
            panic!("out of memory: large object of {} bytes", layout.size())
        });
        trace!("large object: {} bytes at {:p}", layout.size(), start);
        self.large_objects.lock().push(LargeAllocation { start, size });
        self.stats.large_allocations.fetch_add(1, Ordering::Relaxed);
        start
    }

    fn collect(&self, roots: &mut dyn RootProvider) {
        let round = self.stats.collections.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "collection #{round} requested, {} retired blocks",
            self.retired_blocks.lock().len()
        );
        self.collector.collect(self, roots);
    }
}

impl Drop for HeapInner {
    fn drop(&mut self) {
        for large in self.large_objects.get_mut().drain(..) {
            system::unmap_memory(large.start, large.size);
        }
        system::unmap_memory(self.heap_start, self.settings.heap_size);
    }
}

/// Shared handle to the heap.
#[derive(Debug, Clone)]
pub struct Heap(Arc<HeapInner>);

impl Heap {
    pub fn new(
        settings: HeapSettings,
        trace_fn: TraceFn,
        collector: Box<dyn Collector>,
    ) -> Result<Self, SettingsError> {
        HeapInner::new(settings, trace_fn, collector).map(|inner| Self(Arc::new(inner)))
    }

    #[must_use]
    pub fn proxy(&self) -> HeapProxy {
        HeapProxy::new(self.clone())
    }
}

impl Deref for Heap {
    type Target = HeapInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ── Thread-local arena ────────────────────────────────────────────────

/// Thread-local allocator.
///
/// Bump allocates between `bump` and `end` inside the current block. The
/// fast path never takes a lock and never reaches the collector.
#[derive(Debug)]
pub struct HeapProxy {
    pub heap: Heap,
    /// Index of the current block.
    pub block: usize,
    /// Current allocation cursor.
    pub bump: *mut u8,
    /// Limit of the current block.
    pub end: *mut u8,
    /// Bytes handed out by this arena.
    pub allocated: usize,
}

// SAFETY: the raw cursors point into a block owned exclusively by this proxy.
unsafe impl Send for HeapProxy {}

impl HeapProxy {
    #[must_use]
    pub fn new(heap: Heap) -> Self {
        heap.proxies.fetch_add(1, Ordering::AcqRel);
        Self {
            heap,
            block: NO_BLOCK,
            bump: ptr::null_mut(),
            end: ptr::null_mut(),
            allocated: 0,
        }
    }

    /// Allocates memory.
    ///
    /// If the current block is exhausted a new one is requested, which may
    /// run the collector with `roots`.
    #[inline(always)]
    pub fn allocate(
        &mut self,
        layout: Layout,
        roots: &mut dyn RootProvider,
    ) -> NonNull<u8> {
        if layout.size() >= self.heap.settings.large_size {
            return self.allocate_large(layout);
        }

        if let Some(ptr) = self.allocate_on_block(layout) {
            return ptr;
        }

        self.allocate_slow(layout, roots)
    }

    #[cold]
    #[inline(never)]
    fn allocate_slow(
        &mut self,
        layout: Layout,
        roots: &mut dyn RootProvider,
    ) -> NonNull<u8> {
        self.exchange_block(roots);

        match self.allocate_on_block(layout) {
            Some(ptr) => ptr,
            None => panic!("out of memory: {} bytes do not fit a fresh block", layout.size()),
        }
    }

    /// Bump allocates within the current block.
    #[inline]
    pub fn allocate_on_block(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.align().is_power_of_two());

        let cur = self.bump as usize;
        let end = self.end as usize;
        let align = layout.align();

        let aligned = (cur + (align - 1)) & !(align - 1);
        let new_cur = aligned.checked_add(layout.size())?;

        if cur == 0 || new_cur > end {
            return None;
        }

        self.bump = new_cur as *mut u8;
        self.allocated += layout.size();
        NonNull::new(aligned as *mut u8)
    }

    /// Retires the current block and takes a fresh one, collecting once if
    /// the heap has none left.
    pub fn exchange_block(&mut self, roots: &mut dyn RootProvider) {
        self.retire();

        let block = match self.heap.request_block() {
            Some(block) => block,
            None => {
                self.heap.collect(roots);
                self.heap.request_block().unwrap_or_else(|| {
                    panic!("out of memory: no blocks available after collection")
                })
            }
        };

        let (start, end) = self.heap.block_bounds(block);
        self.block = block;
        self.bump = start;
        self.end = end;
        debug!("arena switched to block {block}");
    }

    /// Forces a collection cycle with this thread's roots.
    pub fn collect(&mut self, roots: &mut dyn RootProvider) {
        self.heap.collect(roots);
    }

    fn retire(&mut self) {
        if self.block != NO_BLOCK {
            self.heap.retire_block(self.block);
        }
        self.block = NO_BLOCK;
        self.bump = ptr::null_mut();
        self.end = ptr::null_mut();
    }

    #[cold]
    fn allocate_large(&mut self, layout: Layout) -> NonNull<u8> {
        self.allocated += layout.size();
        self.heap.allocate_large(layout)
    }
}

impl Drop for HeapProxy {
    fn drop(&mut self) {
        self.retire();
        self.heap.proxies.fetch_sub(1, Ordering::AcqRel);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
