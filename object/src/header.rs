use std::sync::atomic::{AtomicU8, Ordering};

/// Object type tag stored in bits 3..7 of the header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    Pair = 0,
    /// Two payload words with no further structure.
    Cell,
    Flonum,
    /// Generic word block; the header carries the payload length.
    Words,
    Vector,
    Str,
    Builtin,
    Thread,
}

impl ObjectType {
    pub const COUNT: usize = Self::Thread as usize + 1;

    pub const ALL: [ObjectType; Self::COUNT] = [
        Self::Pair,
        Self::Cell,
        Self::Flonum,
        Self::Words,
        Self::Vector,
        Self::Str,
        Self::Builtin,
        Self::Thread,
    ];
}

/// GC / bookkeeping flags stored atomically in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HeaderFlags(pub u8);

impl HeaderFlags {
    pub const NONE: Self = Self(0);
    /// Set by a collector while tracing.
    pub const MARKED: Self = Self(1 << 0);
    /// Lives outside the collected heap and never moves.
    pub const PINNED: Self = Self(1 << 1);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

const HEADER_TAG: u8 = 0b011;
const TYPE_SHIFT: u8 = 3;

/// The 8-byte header at the start of every heap object.
///
/// ```text
/// byte 0:    [tag:3 = 0b011] [object_type:5]
/// byte 1:    flags (atomic) - Marked | Pinned
/// bytes 2‥3: reserved (zero)
/// bytes 4‥7: length (u32), payload words for word blocks,
///            characters for strings, zero otherwise
/// ```
///
/// On little-endian systems, reading these 8 bytes as a `u64` yields a
/// value whose low 3 bits are `0b011`, which [`Value::is_header`](crate::Value::is_header) detects.
#[repr(C)]
pub struct Header {
    tag_and_type: u8,
    flags: AtomicU8,
    _reserved: [u8; 2],
    length: u32,
}

const _: () = assert!(size_of::<Header>() == 8);

impl Header {
    pub fn new(object_type: ObjectType) -> Self {
        Self::with_length(object_type, 0)
    }

    pub fn with_length(object_type: ObjectType, length: u32) -> Self {
        Self {
            tag_and_type: ((object_type as u8) << TYPE_SHIFT) | HEADER_TAG,
            flags: AtomicU8::new(0),
            _reserved: [0; 2],
            length,
        }
    }

    pub fn pinned(object_type: ObjectType) -> Self {
        let header = Self::new(object_type);
        header.add_flag(HeaderFlags::PINNED);
        header
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        let raw = self.tag_and_type >> TYPE_SHIFT;
        debug_assert!((raw as usize) < ObjectType::COUNT);
        ObjectType::ALL[raw as usize]
    }

    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.tag_and_type & 0b111 == HEADER_TAG
            && ((self.tag_and_type >> TYPE_SHIFT) as usize) < ObjectType::COUNT
    }

    #[inline(always)]
    pub fn length(&self) -> u32 {
        self.length
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags(self.flags.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_or(flag.0, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_and(!flag.0, Ordering::Relaxed);
    }

    /// Atomically OR flags and return the *previous* flags value.
    #[inline(always)]
    pub fn fetch_or_flags(&self, flag: HeaderFlags) -> HeaderFlags {
        HeaderFlags(self.flags.fetch_or(flag.0, Ordering::Relaxed))
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.object_type())
            .field("flags", &self.flags())
            .field("length", &self.length())
            .finish()
    }
}
