//! Optional and keyword argument binding.
//!
//! A frame arrives as `nargs` values at some base of the value stack:
//! required arguments, then optionals, then keyword/value pairs. Binding
//! rearranges it in place into `ntotal` locals followed by the keyword
//! arguments as they were passed:
//!
//! ```text
//! before: [req..] [opt..] [#:k v #:k v ..]
//! after:  [req..] [opt.. unspecified..] [kw slots..] | [#:k v #:k v ..]
//!          0                                  ntotal ^
//! ```
//!
//! The whole keyword region is validated before the first write, so a
//! failed bind leaves the frame as it was. Binding never allocates on the
//! managed heap.

use bitflags::bitflags;
use object::Value;

use crate::{BindError, ExecutionContext, RuntimeError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindFlags: u8 {
        const ALLOW_OTHER_KEYS = 1 << 0;
        const HAS_REST = 1 << 1;
    }
}

/// A `(keyword id, local slot)` table, as encoded in an instruction stream:
/// the pairs flattened, two words each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordTable<'a> {
    words: &'a [u32],
}

impl<'a> KeywordTable<'a> {
    pub const EMPTY: KeywordTable<'static> = KeywordTable { words: &[] };

    /// Reads the table at `code[at]`: a count word, then that many pairs.
    /// Returns the table and the index just past it.
    ///
    /// # Panics
    ///
    /// If the table runs past the end of `code`.
    pub fn decode(code: &'a [u32], at: usize) -> (Self, usize) {
        let count = code[at] as usize;
        let start = at + 1;
        let end = start + 2 * count;
        assert!(
            end <= code.len(),
            "keyword table at {at} with {count} entries overruns code of {} words",
            code.len()
        );
        (Self { words: &code[start..end] }, end)
    }

    pub fn len(&self) -> usize {
        self.words.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, u32)> + 'a {
        self.words
            .chunks_exact(2)
            .map(|pair| (Value::keyword(pair[0]), pair[1]))
    }

    /// Local slot of `keyword`, scanning in table order.
    #[inline]
    pub fn lookup(&self, keyword: Value) -> Option<u32> {
        let id = keyword.keyword_id()?;
        self.words
            .chunks_exact(2)
            .find(|pair| pair[0] == id)
            .map(|pair| pair[1])
    }
}

/// Shape of a procedure's parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub nreq: u32,
    pub nreq_and_opt: u32,
    /// Every local the bound frame must provide, keyword slots included.
    pub ntotal: u32,
    pub flags: BindFlags,
}

/// Static description of how a procedure binds its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub nreq: u32,
    pub nopt: u32,
    pub ntotal: u32,
    pub flags: BindFlags,
    /// Distance from the binding instruction to its encoded table.
    pub kw_offset: i32,
    keywords: Vec<u32>,
}

impl CallDescriptor {
    pub fn new(nreq: u32, nopt: u32, ntotal: u32, flags: BindFlags) -> Self {
        assert!(
            nreq + nopt <= ntotal,
            "{nreq} required and {nopt} optional parameters exceed {ntotal} locals"
        );
        Self {
            nreq,
            nopt,
            ntotal,
            flags,
            kw_offset: 0,
            keywords: Vec::new(),
        }
    }

    /// Maps `keyword` to local `slot`.
    pub fn with_keyword(mut self, keyword: Value, slot: u32) -> Self {
        let id = match keyword.keyword_id() {
            Some(id) => id,
            None => panic!("{keyword:?} is not a keyword"),
        };
        assert!(slot < self.ntotal, "keyword slot {slot} outside {} locals", self.ntotal);
        self.keywords.extend([id, slot]);
        self
    }

    pub fn with_kw_offset(mut self, kw_offset: i32) -> Self {
        self.kw_offset = kw_offset;
        self
    }

    pub fn arity(&self) -> Arity {
        Arity {
            nreq: self.nreq,
            nreq_and_opt: self.nreq + self.nopt,
            ntotal: self.ntotal,
            flags: self.flags,
        }
    }

    pub fn keywords(&self) -> KeywordTable<'_> {
        KeywordTable {
            words: &self.keywords,
        }
    }

    /// Appends the encoded keyword table to `code`.
    pub fn encode_keywords(&self, code: &mut Vec<u32>) {
        code.push((self.keywords.len() / 2) as u32);
        code.extend_from_slice(&self.keywords);
    }

    /// Binds the frame at `stack[base..base + nargs]`.
    pub fn bind(
        &self,
        stack: &mut Vec<Value>,
        base: usize,
        nargs: usize,
    ) -> Result<usize, BindError> {
        bind_frame(stack, base, nargs, &self.arity(), self.keywords())
    }
}

/// Where the keyword region starts: arguments past `nreq` stay positional
/// while below `nreq_and_opt` and not keywords.
fn positional_count(args: &[Value], arity: &Arity) -> usize {
    let limit = (arity.nreq_and_opt as usize).min(args.len());
    let mut n = arity.nreq as usize;
    while n < limit && !args[n].is_keyword() {
        n += 1;
    }
    n
}

fn validate_keywords(
    region: &[Value],
    flags: BindFlags,
    keywords: KeywordTable<'_>,
    error_extra: BindError,
) -> Result<(), BindError> {
    let mut i = 0;
    while i < region.len() {
        let value = region[i];
        if value.is_keyword() {
            match keywords.lookup(value) {
                Some(_) if i + 1 == region.len() => {
                    return Err(BindError::MissingKeywordValue { keyword: value });
                }
                None if !flags.contains(BindFlags::ALLOW_OTHER_KEYS) => {
                    return Err(BindError::UnrecognizedKeyword { keyword: value });
                }
                // an ignored key at the very end has nothing to skip
                _ => {}
            }
            i += 2;
        } else if flags.contains(BindFlags::HAS_REST) {
            i += 1;
        } else if i == 0 {
            return Err(error_extra);
        } else {
            return Err(BindError::InvalidKeyword { value });
        }
    }
    Ok(())
}

/// Binds the frame at `stack[base..base + nargs]` in place and returns the
/// bound frame size, `ntotal` plus the number of keyword-region values.
///
/// The stack grows if the bound frame is larger than what was pushed.
pub fn bind_frame(
    stack: &mut Vec<Value>,
    base: usize,
    nargs: usize,
    arity: &Arity,
    keywords: KeywordTable<'_>,
) -> Result<usize, BindError> {
    let nreq = arity.nreq as usize;
    let ntotal = arity.ntotal as usize;
    assert!(
        nreq <= arity.nreq_and_opt as usize && arity.nreq_and_opt <= arity.ntotal,
        "malformed arity {arity:?}"
    );
    assert!(
        base + nargs <= stack.len(),
        "frame of {nargs} arguments at {base} overruns stack of {}",
        stack.len()
    );

    if nargs < nreq {
        return Err(BindError::WrongNumberOfArgs {
            nargs,
            nreq,
            max: arity.nreq_and_opt as usize,
        });
    }

    let args = &stack[base..base + nargs];
    let npositional = positional_count(args, arity);
    let nkw = nargs - npositional;
    validate_keywords(
        &args[npositional..],
        arity.flags,
        keywords,
        BindError::WrongNumberOfArgs {
            nargs,
            nreq,
            max: arity.nreq_and_opt as usize,
        },
    )?;

    let frame_size = ntotal + nkw;
    let frame_end = base + frame_size;
    if stack.len() < frame_end {
        stack.resize(frame_end, Value::UNSPECIFIED);
    }

    // keyword region above the locals, then clear what it vacated
    stack.copy_within(base + npositional..base + nargs, base + ntotal);
    stack[base + npositional..base + ntotal].fill(Value::UNSPECIFIED);

    let region = base + ntotal..frame_end;
    let mut i = region.start;
    while i < region.end {
        let value = stack[i];
        if value.is_keyword() {
            if let Some(slot) = keywords.lookup(value) {
                debug_assert!((slot as usize) < ntotal);
                stack[base + slot as usize] = stack[i + 1];
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    Ok(frame_size)
}

/// Result of [`bind_kwargs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundFrame {
    /// Locals plus keyword-region values now at `fp + offset`.
    pub frame_size: usize,
    /// Instruction index just past the keyword table.
    pub next_ip: usize,
}

/// The binding intrinsic as compiled code calls it.
///
/// The frame starts at `fp + offset` in the context's value stack; the
/// keyword table is found at `ip + kw_offset` in `code`.
#[allow(clippy::too_many_arguments)]
pub fn bind_kwargs(
    ctx: &mut ExecutionContext,
    fp: usize,
    offset: usize,
    nargs: usize,
    code: &[u32],
    ip: usize,
    nreq: u32,
    flags: BindFlags,
    nreq_and_opt: u32,
    ntotal: u32,
    kw_offset: i32,
) -> Result<BoundFrame, RuntimeError> {
    let table_at = ip
        .checked_add_signed(kw_offset as isize)
        .unwrap_or_else(|| panic!("keyword table offset {kw_offset} from {ip} out of range"));
    let (keywords, next_ip) = KeywordTable::decode(code, table_at);
    let arity = Arity {
        nreq,
        nreq_and_opt,
        ntotal,
        flags,
    };
    let frame_size = bind_frame(&mut ctx.stack, fp + offset, nargs, &arity, keywords)?;
    Ok(BoundFrame {
        frame_size,
        next_ip,
    })
}
