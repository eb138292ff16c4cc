//! A non-moving, block-granular collector.
//!
//! Marks everything reachable from the supplied roots through the heap's
//! [`TraceFn`](crate::TraceFn), hands every retired block that holds no
//! marked object back to the free list and unmaps unmarked large objects.
//!
//! Only the triggering arena's roots are visible, so nothing is reclaimed
//! while more than one arena is registered with the heap.

use std::collections::HashSet;

use log::debug;
use object::{Header, HeaderFlags, Value};

use crate::{Collector, HeapInner, RootProvider};

#[derive(Debug, Default, Clone, Copy)]
pub struct BlockCollector;

impl Collector for BlockCollector {
    fn collect(&self, heap: &HeapInner, roots: &mut dyn RootProvider) {
        let arenas = heap.proxy_count();
        if arenas > 1 {
            debug!("block collector skipped: {arenas} arenas share the heap");
            return;
        }

        let trace = heap.trace_fn();
        let block_size = heap.settings.block_size;
        let (heap_start, _) = heap.block_bounds(0);
        let heap_start = heap_start as usize;

        let mut live_blocks = vec![false; heap.block_count()];
        let mut live_large: HashSet<usize> = HashSet::new();
        let mut marked: Vec<*const Header> = Vec::new();
        let mut worklist: Vec<*const u8> = Vec::new();

        let push = |value: &mut Value, worklist: &mut Vec<*const u8>| {
            if value.is_ref() {
                worklist.push(value.ref_bits() as *const u8);
            }
        };

        roots.visit_roots(&mut |value| push(value, &mut worklist));

        while let Some(obj) = worklist.pop() {
            // SAFETY: roots and traced edges reference live objects
            let header = unsafe { &*(obj as *const Header) };
            if header.has_flag(HeaderFlags::PINNED)
                || header.fetch_or_flags(HeaderFlags::MARKED).contains(HeaderFlags::MARKED)
            {
                continue;
            }
            marked.push(header);
            if heap.contains(obj) {
                live_blocks[(obj as usize - heap_start) / block_size] = true;
            } else {
                live_large.insert(obj as usize);
            }
            // SAFETY: obj is a live object with a valid header
            unsafe { trace(obj, &mut |value| push(value, &mut worklist)) };
        }

        for header in marked {
            // SAFETY: collected from live objects above
            unsafe { (*header).remove_flag(HeaderFlags::MARKED) };
        }

        let mut released = 0;
        for block in heap.retired_blocks() {
            if !live_blocks[block] {
                heap.release_block(block);
                released += 1;
            }
        }
        let unmapped =
            heap.sweep_large_objects(|start| live_large.contains(&(start as usize)));
        debug!("block collector released {released} blocks, {unmapped} large objects");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Heap, HeapSettings};
    use object::{ObjectType, Pair, Words, init_cell, init_words};
    use std::alloc::Layout;

    unsafe fn pair_trace(obj: *const u8, visitor: &mut dyn FnMut(&mut Value)) {
        // SAFETY: tests only allocate pairs and edge-free word blocks
        unsafe {
            if (*(obj as *const Header)).object_type() != ObjectType::Pair {
                return;
            }
            let pair = &mut *(obj as *mut Pair);
            visitor(&mut pair.car);
            visitor(&mut pair.cdr);
        }
    }

    struct Roots(Vec<Value>);

    impl RootProvider for Roots {
        fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
            self.0.iter_mut().for_each(visitor);
        }
    }

    fn alloc_pair(proxy: &mut crate::HeapProxy, roots: &mut Roots, car: Value, cdr: Value) -> Value {
        let layout = Layout::new::<Pair>();
        let ptr = proxy.allocate(layout, roots).cast::<Pair>();
        unsafe { init_cell(ptr.as_ptr(), ObjectType::Pair, car, cdr) };
        Value::from_ptr(ptr.as_ptr())
    }

    fn alloc_words(proxy: &mut crate::HeapProxy, roots: &mut Roots, n: u32) -> Value {
        let layout = Layout::from_size_align(object::words_allocation_size(n), 8).unwrap();
        let ptr = proxy.allocate(layout, roots).cast::<Words>();
        unsafe { init_words(ptr.as_ptr(), ObjectType::Vector, n) };
        Value::from_ptr(ptr.as_ptr())
    }

    fn four_block_heap() -> Heap {
        let settings = HeapSettings {
            heap_size: 4096 * 4,
            block_size: 4096,
            large_size: 2048,
        };
        Heap::new(settings, pair_trace, Box::new(BlockCollector)).unwrap()
    }

    fn assert_list(mut cursor: Value, len: i64) {
        for i in (0..len).rev() {
            let pair = unsafe { cursor.as_ref::<Pair>() };
            assert_eq!(pair.car, Value::from_i64(i));
            cursor = pair.cdr;
        }
        assert_eq!(cursor, Value::NIL);
    }

    #[test]
    fn live_blocks_survive_and_garbage_blocks_are_reused() {
        let settings = HeapSettings {
            heap_size: 4096 * 3,
            block_size: 4096,
            large_size: 4096,
        };
        let heap = Heap::new(settings, pair_trace, Box::new(BlockCollector)).unwrap();
        let mut proxy = heap.proxy();
        let mut roots = Roots(Vec::new());

        // one live pair in the first block
        let live = alloc_pair(&mut proxy, &mut roots, Value::from_i64(7), Value::NIL);
        let live_block = proxy.block;
        roots.0.push(live);

        // 4096 / 24 = 170 pairs per block; fill well past three blocks
        for i in 0..600 {
            alloc_pair(&mut proxy, &mut roots, Value::from_i64(i), Value::NIL);
        }

        assert!(heap.stats.collections.load(std::sync::atomic::Ordering::Relaxed) >= 1);
        assert!(heap.retired_blocks().contains(&live_block));
        let pair = unsafe { roots.0[0].as_ref::<Pair>() };
        assert_eq!(pair.car, Value::from_i64(7));
        assert!(!pair.header.has_flag(HeaderFlags::MARKED));
    }

    #[test]
    fn nothing_is_reclaimed_while_another_arena_is_alive() {
        let heap = four_block_heap();
        let mut a = heap.proxy();
        let mut a_roots = Roots(Vec::new());
        let mut list = Value::NIL;
        for i in 0..10 {
            list = alloc_pair(&mut a, &mut a_roots, Value::from_i64(i), list);
        }
        a_roots.0.push(list);
        let a_block = a.block;
        a.exchange_block(&mut a_roots);

        let mut b = heap.proxy();
        let mut b_roots = Roots(Vec::new());
        alloc_pair(&mut b, &mut b_roots, Value::NIL, Value::NIL);
        b.exchange_block(&mut b_roots);
        b.collect(&mut b_roots);

        assert_eq!(heap.stats.collections.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert!(heap.retired_blocks().contains(&a_block));
        // b's allocations cannot land on a's cells
        for i in 0..100 {
            alloc_pair(&mut b, &mut b_roots, Value::from_i64(-i), Value::NIL);
        }
        assert_list(a_roots.0[0], 10);

        // alone again, a's collection frees b's garbage but not a's list
        drop(b);
        a.collect(&mut a_roots);
        assert!(heap.retired_blocks().contains(&a_block));
        assert_eq!(heap.retired_blocks().len(), 1);
        assert_list(a_roots.0[0], 10);
    }

    #[test]
    fn unreachable_large_objects_are_unmapped() {
        let heap = four_block_heap();
        let mut proxy = heap.proxy();
        let mut roots = Roots(Vec::new());

        let live = alloc_words(&mut proxy, &mut roots, 400);
        roots.0.push(live);
        alloc_words(&mut proxy, &mut roots, 400);
        alloc_words(&mut proxy, &mut roots, 500);
        assert_eq!(heap.large_object_count(), 3);

        proxy.collect(&mut roots);

        assert_eq!(heap.large_object_count(), 1);
        let words = unsafe { roots.0[0].as_ref::<Words>() };
        assert_eq!(words.len(), 400);
        assert!(!words.header.has_flag(HeaderFlags::MARKED));
    }
}
