mod collector;
mod heap;
mod system;

pub use collector::BlockCollector;
pub use heap::*;
pub use system::{OS_PAGE_SIZE, map_memory, unmap_memory};
