//! Kelp Storage - tiered cache and retention manager
//!
//! Two tiers sit behind [`RetentionManager::get_or_compute`]:
//!
//! - a bounded in-process [`MemoryTier`] per cache type
//! - a [`PersistentStore`] holding structured [`CacheRecord`]s
//!   ([`LmdbRecordStore`] on disk, [`InMemoryRecordStore`] for tests and
//!   ephemeral deployments)
//!
//! Every persistent operation carries a timeout. A failing or slow store is
//! treated as a miss, so the caller always gets the value its own compute
//! function produces.
//!
//! [`CacheRecord`]: kelp_core::CacheRecord

pub mod cache;
pub mod manager;

pub use cache::{
    BatchAction, BatchOutcome, CacheRead, InMemoryRecordStore, LmdbRecordStore, LmdbStoreError,
    MatchedRecord, MemoryTier, PersistentStore, ReadSource, StoreStats, TypeStats,
};
pub use manager::{CacheConfig, CacheRequest, CacheStatistics, RetentionManager};
