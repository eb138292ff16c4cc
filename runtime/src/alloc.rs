//! Allocation intrinsics called from compiled code.
//!
//! Each one bumps the context's arena and stamps the header before anything
//! else can run, so the returned object is well-formed the instant the
//! collector could see it. Payload values travel through
//! [`ExecutionContext::allocate_rooted`] and are written from the root
//! slots, which a relocating collector may have updated.

use std::alloc::Layout;

use object::{
    Flonum, ObjectType, Pair, Str, Tagged, Value, Words, cell_allocation_size,
    flonum_allocation_size, init_cell, init_flonum, init_str, init_words,
    str_payload_words, words_allocation_size,
};

use crate::ExecutionContext;

#[inline(always)]
fn word_layout(size: usize) -> Layout {
    Layout::from_size_align(size, 8).expect("create valid layout")
}

/// Allocates a two-word cell with an arbitrary object type.
pub fn allocate_cell(
    ctx: &mut ExecutionContext,
    tag: ObjectType,
    word0: Value,
    word1: Value,
) -> Tagged<Pair> {
    let mut pending = [word0, word1];
    let ptr = ctx
        .allocate_rooted(word_layout(cell_allocation_size()), &mut pending)
        .cast::<Pair>();
    // SAFETY: fresh allocation of cell size
    unsafe { init_cell(ptr.as_ptr(), tag, pending[0], pending[1]) };
    Tagged::from_ptr(ptr.as_ptr())
}

pub fn cons(ctx: &mut ExecutionContext, car: Value, cdr: Value) -> Value {
    allocate_cell(ctx, ObjectType::Pair, car, cdr).value()
}

/// Boxes a double.
pub fn from_double(ctx: &mut ExecutionContext, value: f64) -> Value {
    let ptr = ctx
        .allocate_rooted(word_layout(flonum_allocation_size()), &mut [])
        .cast::<Flonum>();
    // SAFETY: fresh allocation of flonum size
    unsafe { init_flonum(ptr.as_ptr(), value) };
    Value::from_ptr(ptr.as_ptr())
}

/// Allocates a header plus `n_words` zeroed payload words.
///
/// Blocks at or above the heap's large-object size are placed outside the
/// arena.
pub fn allocate_words(
    ctx: &mut ExecutionContext,
    tag: ObjectType,
    n_words: u32,
) -> Tagged<Words> {
    let ptr = ctx
        .allocate_rooted(word_layout(words_allocation_size(n_words)), &mut [])
        .cast::<Words>();
    // SAFETY: fresh allocation of n_words payload words
    unsafe { init_words(ptr.as_ptr(), tag, n_words) };
    Tagged::from_ptr(ptr.as_ptr())
}

/// Copies `s` into a fresh immutable string.
pub fn allocate_string(ctx: &mut ExecutionContext, s: &str) -> Value {
    let size = words_allocation_size(str_payload_words(s.len()));
    let ptr = ctx.allocate_rooted(word_layout(size), &mut []).cast::<Str>();
    // SAFETY: size covers the header, the length word and the padded bytes
    unsafe { init_str(ptr.as_ptr(), s) };
    Value::from_ptr(ptr.as_ptr())
}

/// Length of a string in characters.
///
/// # Safety
///
/// `string` must reference a live object made by [`allocate_string`].
pub unsafe fn string_length(string: Value) -> usize {
    // SAFETY: guaranteed by caller
    let s = unsafe { string.as_ref::<Str>() };
    debug_assert_eq!(s.header.object_type(), ObjectType::Str);
    s.char_len()
}
