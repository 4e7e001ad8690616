//! Free-space tracking for ROOT files
//!
//! Free space is an ordered list of inclusive `[first, last]` byte ranges.
//! The last range always covers the end of the file and grows on demand, so
//! new records are appended by carving its front.

pub mod free_list;

pub use free_list::{FreeBlock, FreeList, GROWTH_INCREMENT};
