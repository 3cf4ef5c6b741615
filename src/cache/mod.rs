//! Cache storage: named buckets of request → response entries
//!
//! The `CacheStorage` trait is what the asset cache manager talks to. Two
//! backends are provided: `MemoryStorage` for in-process use and tests, and
//! `DiskStorage`, which persists buckets under the XDG cache directory so
//! they survive between runs.

mod disk;
mod memory;
mod storage;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;
pub use storage::{CacheError, CacheStorage};
