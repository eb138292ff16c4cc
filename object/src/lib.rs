mod value;
mod handle;
mod header;
mod objects;

pub use value::Value;
pub use handle::Tagged;
pub use header::{Header, HeaderFlags, ObjectType};
pub use objects::{
    Pair, cell_allocation_size, init_cell,
    Flonum, flonum_allocation_size, init_flonum,
    Words, words_allocation_size, init_words,
    Str, str_payload_words, init_str,
};
