use crate::header::{Header, ObjectType};
use crate::Value;

const WORD: usize = size_of::<u64>();

// ── Pair / Cell ────────────────────────────────────────────────────

/// A cons cell.
///
/// ```text
/// [Header 8B] [car: Value 8B] [cdr: Value 8B]
/// ```
///
/// Generic two-word cells share this layout under [`ObjectType::Cell`].
#[repr(C)]
pub struct Pair {
    pub header: Header,
    pub car: Value,
    pub cdr: Value,
}

const _: () = assert!(size_of::<Pair>() == 24);

pub const fn cell_allocation_size() -> usize {
    size_of::<Pair>()
}

/// Initialize a two-word cell at a raw allocation.
///
/// # Safety
///
/// `ptr` must point to at least [`cell_allocation_size`] writable bytes.
pub unsafe fn init_cell(ptr: *mut Pair, tag: ObjectType, car: Value, cdr: Value) {
    // SAFETY: guaranteed by caller
    unsafe {
        ptr.write(Pair {
            header: Header::new(tag),
            car,
            cdr,
        });
    }
}

// ── Flonum ─────────────────────────────────────────────────────────

/// A boxed double.
///
/// ```text
/// [Header 8B] [value: f64 8B]
/// ```
#[repr(C)]
pub struct Flonum {
    pub header: Header,
    pub value: f64,
}

const _: () = assert!(size_of::<Flonum>() == 16);

pub const fn flonum_allocation_size() -> usize {
    size_of::<Flonum>()
}

/// # Safety
///
/// `ptr` must point to at least [`flonum_allocation_size`] writable bytes.
pub unsafe fn init_flonum(ptr: *mut Flonum, value: f64) {
    // SAFETY: guaranteed by caller
    unsafe {
        ptr.write(Flonum {
            header: Header::new(ObjectType::Flonum),
            value,
        });
    }
}

// ── Words ──────────────────────────────────────────────────────────

/// A variable-length block of payload words.
///
/// ```text
/// [Header 8B, length = n] [word_0 8B] ... [word_n-1 8B]
/// ```
///
/// The object type in the header is whatever the allocating site asked
/// for; vectors and other word-shaped objects use this layout.
#[repr(C)]
pub struct Words {
    pub header: Header,
}

impl Words {
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.header.length() as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Safety
    ///
    /// The inline memory after the header must hold `len()` valid words.
    #[inline(always)]
    pub unsafe fn words(&self) -> &[Value] {
        // SAFETY: guaranteed by caller
        unsafe {
            let ptr = (self as *const Words).add(1) as *const Value;
            core::slice::from_raw_parts(ptr, self.len())
        }
    }

    /// # Safety
    ///
    /// The inline memory after the header must hold `len()` valid words.
    #[inline(always)]
    pub unsafe fn words_mut(&mut self) -> &mut [Value] {
        // SAFETY: guaranteed by caller
        unsafe {
            let ptr = (self as *mut Words).add(1) as *mut Value;
            core::slice::from_raw_parts_mut(ptr, self.len())
        }
    }
}

pub const fn words_allocation_size(n_words: u32) -> usize {
    size_of::<Words>() + n_words as usize * WORD
}

/// Stamp a word-block header and zero its payload.
///
/// # Safety
///
/// `ptr` must point to at least [`words_allocation_size`]`(n_words)`
/// writable bytes.
pub unsafe fn init_words(ptr: *mut Words, tag: ObjectType, n_words: u32) {
    // SAFETY: guaranteed by caller
    unsafe {
        ptr.write(Words {
            header: Header::with_length(tag, n_words),
        });
        let payload = ptr.add(1) as *mut u8;
        payload.write_bytes(0, n_words as usize * WORD);
    }
}

// ── Str ────────────────────────────────────────────────────────────

/// An immutable UTF-8 string.
///
/// ```text
/// [Header 8B, length = chars] [byte_len: u64 8B] [bytes, padded to 8B]
/// ```
#[repr(C)]
pub struct Str {
    pub header: Header,
    byte_len: u64,
}

const _: () = assert!(size_of::<Str>() == 16);

impl Str {
    /// Length in characters.
    #[inline(always)]
    pub fn char_len(&self) -> usize {
        self.header.length() as usize
    }

    #[inline(always)]
    pub fn byte_len(&self) -> usize {
        self.byte_len as usize
    }

    /// # Safety
    ///
    /// The object must have been initialized with [`init_str`].
    pub unsafe fn as_str(&self) -> &str {
        // SAFETY: init_str copied valid UTF-8 of byte_len bytes
        unsafe {
            let ptr = (self as *const Str).add(1) as *const u8;
            let bytes = core::slice::from_raw_parts(ptr, self.byte_len());
            core::str::from_utf8_unchecked(bytes)
        }
    }
}

/// Payload words needed after the header for a string of `byte_len` bytes.
pub const fn str_payload_words(byte_len: usize) -> u32 {
    (1 + byte_len.div_ceil(WORD)) as u32
}

/// # Safety
///
/// `ptr` must point to at least `8 + 8 * str_payload_words(s.len())`
/// writable bytes.
pub unsafe fn init_str(ptr: *mut Str, s: &str) {
    let chars = s.chars().count() as u32;
    // SAFETY: guaranteed by caller
    unsafe {
        ptr.write(Str {
            header: Header::with_length(ObjectType::Str, chars),
            byte_len: s.len() as u64,
        });
        let dst = ptr.add(1) as *mut u8;
        core::ptr::copy_nonoverlapping(s.as_ptr(), dst, s.len());
        let padded = s.len().next_multiple_of(WORD);
        dst.add(s.len()).write_bytes(0, padded - s.len());
    }
}
