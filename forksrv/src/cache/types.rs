//! Core types for the translation cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TranslateError;
use crate::request::TranslationKey;

/// Default number of hint slots (must be a power of two).
pub const DEFAULT_HINT_SLOTS: usize = 1 << 12;

/// Default upper bound of the mapped code region.
pub const DEFAULT_MAPPED_LIMIT: u64 = 0x4000_0000;

/// Upper bound on hint slots; larger requests are clamped.
pub const MAX_HINT_SLOTS: usize = 1 << 24;

/// External translation engine.
///
/// Turns a code region into its executable representation. The cache calls
/// it with both the mapping lock and the table lock held.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &TranslationKey) -> Result<Vec<u8>, TranslateError>;
}

/// Compiled representation of one code region.
///
/// Units are created and owned by the cache table. Once inserted they are
/// never removed for the lifetime of the store.
#[derive(Debug, PartialEq, Eq)]
pub struct CachedCodeUnit {
    key: TranslationKey,
    code: Box<[u8]>,
}

impl CachedCodeUnit {
    pub fn new(key: TranslationKey, code: Vec<u8>) -> Self {
        Self {
            key,
            code: code.into_boxed_slice(),
        }
    }

    pub fn key(&self) -> TranslationKey {
        self.key
    }

    pub fn pc(&self) -> u64 {
        self.key.pc
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn size(&self) -> usize {
        self.code.len()
    }
}

/// Where a lookup found its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOrigin {
    /// Direct-mapped hint slot, no locks taken
    Hint,
    /// Translation table, under the locks
    Table,
    /// Not cached; the translator was called
    Generated,
}

/// Result of an on-demand lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub unit: Arc<CachedCodeUnit>,
    pub origin: LookupOrigin,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        self.origin != LookupOrigin::Generated
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of hint slots, rounded up to a power of two
    pub hint_slots: usize,
    /// Initial upper bound of the mapped code region
    pub mapped_limit: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hint_slots: DEFAULT_HINT_SLOTS,
            mapped_limit: DEFAULT_MAPPED_LIMIT,
        }
    }
}

/// What the drain loop did with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    GlobalUpdated,
    /// `pc` at or above the mapped-region bound; dropped
    OutOfRange,
    AlreadyCached,
    Generated,
    /// The translator refused the region
    Failed,
}

/// Per-round summary of the drain loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub received: u64,
    pub global_updates: u64,
    pub out_of_range: u64,
    pub already_cached: u64,
    pub generated: u64,
    pub failed: u64,
    pub malformed: u64,
}

impl DrainReport {
    pub(crate) fn record(&mut self, outcome: PrefetchOutcome) {
        self.received += 1;
        match outcome {
            PrefetchOutcome::GlobalUpdated => self.global_updates += 1,
            PrefetchOutcome::OutOfRange => self.out_of_range += 1,
            PrefetchOutcome::AlreadyCached => self.already_cached += 1,
            PrefetchOutcome::Generated => self.generated += 1,
            PrefetchOutcome::Failed => self.failed += 1,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups served from a hint slot
    pub hint_hits: u64,
    /// Lookups served from the table
    pub table_hits: u64,
    /// Units generated by on-demand lookups
    pub generated: u64,
    /// Requests received by the drain loop
    pub drained: u64,
    /// Units generated on behalf of a child
    pub prefetched: u64,
    /// Requests for units that already existed
    pub prefetch_duplicates: u64,
    /// Requests dropped by the mapped-region guard
    pub out_of_range: u64,
    /// Global node updates
    pub global_updates: u64,
    /// Translator failures (both paths)
    pub translate_failures: u64,
    /// Units currently in the table
    pub entries: u64,
}

impl CacheStats {
    /// Fraction of on-demand lookups that avoided the translator.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hint_hits + self.table_hits;
        let total = hits + self.generated;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hint_hits: AtomicU64,
    pub table_hits: AtomicU64,
    pub generated: AtomicU64,
    pub drained: AtomicU64,
    pub prefetched: AtomicU64,
    pub prefetch_duplicates: AtomicU64,
    pub out_of_range: AtomicU64,
    pub global_updates: AtomicU64,
    pub translate_failures: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            hint_hits: self.hint_hits.load(Ordering::Relaxed),
            table_hits: self.table_hits.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            prefetched: self.prefetched.load(Ordering::Relaxed),
            prefetch_duplicates: self.prefetch_duplicates.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            global_updates: self.global_updates.load(Ordering::Relaxed),
            translate_failures: self.translate_failures.load(Ordering::Relaxed),
            entries: entries as u64,
        }
    }
}
