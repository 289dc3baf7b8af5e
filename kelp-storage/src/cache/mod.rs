//! Cache tiers and persistent record stores.
//!
//! The memory tier holds decoded values with their expiry; the persistent
//! stores hold full [`kelp_core::CacheRecord`]s including retention
//! bookkeeping. Compressed payloads are decoded transparently on read.

pub mod codec;
pub mod lmdb_backend;
pub mod memory_store;
pub mod memory_tier;
pub mod read;
pub mod traits;

pub use lmdb_backend::{LmdbRecordStore, LmdbStoreError};
pub use memory_store::InMemoryRecordStore;
pub use memory_tier::MemoryTier;
pub use read::{CacheRead, ReadSource};
pub use traits::{BatchAction, BatchOutcome, MatchedRecord, PersistentStore, StoreStats, TypeStats};
