/// Tag constants.
const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;
const WIDE_TAG_MASK: u64 = 0b111;
const HEADER_TAG: u64 = 0b011;
const IMMEDIATE_TAG: u64 = 0b111;
const KEYWORD_BIT: u64 = 0b1000;
const IMMEDIATE_SHIFT: u32 = 8;

const fn constant(code: u64) -> Value {
    Value((code << IMMEDIATE_SHIFT) | IMMEDIATE_TAG)
}

/// A tagged 64-bit value.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0`  63-bit signed integer (low bit 0).
/// - **Reference**: `...XXXX01`  heap pointer (mask low 2 bits; objects are 8-byte aligned).
/// - **Header**:    `...XXX011`  only valid as the first word of a heap object.
/// - **Immediate**: `...XXX111`  constants (`#f`, `#t`, `'()`, unspecified,
///   undefined, eof) and keywords. Bit 3 selects keyword, the payload sits
///   above bit 8.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const FALSE: Value = constant(0);
    pub const TRUE: Value = constant(1);
    pub const NIL: Value = constant(2);
    pub const UNSPECIFIED: Value = constant(3);
    pub const UNDEFINED: Value = constant(4);
    pub const EOF: Value = constant(5);

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(
            (-(1i64 << 62)..(1i64 << 62)).contains(&n),
            "fixnum overflow: {n}"
        );
        Self((n << 1) as u64)
    }

    /// # Safety
    ///
    /// The value must be a fixnum.
    #[inline(always)]
    pub unsafe fn to_i64(self) -> i64 {
        debug_assert!(self.is_fixnum());
        (self.0 as i64) >> 1
    }

    /// Checked fixnum extraction for callers that cannot prove the tag.
    #[inline(always)]
    pub fn as_fixnum(self) -> Option<i64> {
        // SAFETY: tag checked
        self.is_fixnum().then(|| unsafe { self.to_i64() })
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        let addr = ptr as u64;
        debug_assert!(addr & WIDE_TAG_MASK == 0, "pointer not aligned");
        Self(addr | REF_TAG)
    }

    #[inline(always)]
    pub const fn ref_bits(self) -> u64 {
        self.0 & !TAG_MASK
    }

    /// # Safety
    ///
    /// The value must be a reference to a valid, live `T`.
    #[inline(always)]
    pub unsafe fn as_ref<T>(&self) -> &T {
        debug_assert!(self.is_ref());
        // SAFETY: guaranteed by caller
        unsafe { &*(self.ref_bits() as *const T) }
    }

    /// # Safety
    ///
    /// The value must be a reference to a valid, live `T`, and no other
    /// references to it may exist.
    #[inline(always)]
    pub unsafe fn as_mut<T>(&mut self) -> &mut T {
        debug_assert!(self.is_ref());
        // SAFETY: guaranteed by caller
        unsafe { &mut *(self.ref_bits() as *mut T) }
    }

    #[inline(always)]
    pub const fn is_header(self) -> bool {
        self.0 & WIDE_TAG_MASK == HEADER_TAG
    }

    // ── Immediates ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 & WIDE_TAG_MASK == IMMEDIATE_TAG
    }

    #[inline(always)]
    pub const fn keyword(id: u32) -> Self {
        Self(((id as u64) << IMMEDIATE_SHIFT) | KEYWORD_BIT | IMMEDIATE_TAG)
    }

    #[inline(always)]
    pub const fn is_keyword(self) -> bool {
        self.is_immediate() && self.0 & KEYWORD_BIT != 0
    }

    #[inline(always)]
    pub const fn keyword_id(self) -> Option<u32> {
        if self.is_keyword() {
            Some((self.0 >> IMMEDIATE_SHIFT) as u32)
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn is_unspecified(self) -> bool {
        self.0 == Self::UNSPECIFIED.0
    }

    #[inline(always)]
    pub const fn is_false(self) -> bool {
        self.0 == Self::FALSE.0
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_fixnum() {
            // SAFETY: tag checked
            write!(f, "Fixnum({})", unsafe { self.to_i64() })
        } else if self.is_ref() {
            write!(f, "Ref(0x{:x})", self.ref_bits())
        } else if let Some(id) = self.keyword_id() {
            write!(f, "Keyword({id})")
        } else if self.is_immediate() {
            let name = match *self {
                Self::FALSE => "#f",
                Self::TRUE => "#t",
                Self::NIL => "()",
                Self::UNSPECIFIED => "#<unspecified>",
                Self::UNDEFINED => "#<undefined>",
                Self::EOF => "#<eof>",
                _ => "#<immediate>",
            };
            f.write_str(name)
        } else {
            write!(f, "Header(0x{:016x})", self.0)
        }
    }
}
