//! BasaltDB buffer pool.
//!
//! This crate owns the memory tier of the storage engine: a fixed array of
//! page frames, the extendible-hash page table, the LRU-K replacement policy,
//! and the disk manager the pool reads and writes pages through.

pub mod disk;
pub mod frame;
pub mod hash_table;
pub mod pool;
pub mod replacer;

pub use disk::{DiskManager, FileDiskManager};
pub use frame::{Frame, FrameId};
pub use hash_table::ExtendibleHashTable;
pub use pool::{BufferPoolConfig, BufferPoolManager, BufferPoolStats};
pub use replacer::{LruKReplacer, Replacer};
