//! Provenance-carrying read results.

use kelp_core::CacheKey;
use serde::{Deserialize, Serialize};

/// Which tier answered a get-or-compute call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Memory,
    Persistent,
    /// Neither tier had a fresh entry; the caller's compute function ran.
    Computed,
}

/// Value returned by get-or-compute together with where it came from.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cache_key: CacheKey,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, cache_key: CacheKey, source: ReadSource) -> Self {
        Self {
            value,
            cache_key,
            source,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// True when no compute happened.
    pub fn was_cache_hit(&self) -> bool {
        self.source != ReadSource::Computed
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            cache_key: self.cache_key,
            source: self.source,
        }
    }
}
