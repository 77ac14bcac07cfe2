use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::hints::AddressHints;
use super::nodes::GlobalNodeTable;
use super::types::{
    CacheConfig, CacheCounters, CacheStats, CachedCodeUnit, DrainReport, Lookup, LookupOrigin,
    PrefetchOutcome, Translator,
};
use crate::channel::RequestReceiver;
use crate::error::TranslateError;
use crate::request::{TranslationKey, TranslationRequest};

/// State guarded by the mapping lock.
#[derive(Debug)]
struct MappedRegion {
    /// Everything below this address may hold guest code
    limit: u64,
}

/// Translation cache shared by the engine and, through fork, its children.
///
/// Lock order is always `mapping` then `table`, on the drain path and on the
/// on-demand path alike. Hint slots are written under the table lock and
/// read without any lock.
pub struct TranslationCacheStore {
    config: CacheConfig,
    mapping: Mutex<MappedRegion>,
    table: Mutex<HashMap<TranslationKey, Arc<CachedCodeUnit>>>,
    hints: OnceLock<AddressHints>,
    nodes: OnceLock<GlobalNodeTable>,
    counters: CacheCounters,
}

impl TranslationCacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            mapping: Mutex::new(MappedRegion {
                limit: config.mapped_limit,
            }),
            table: Mutex::new(HashMap::new()),
            hints: OnceLock::new(),
            nodes: OnceLock::new(),
            counters: CacheCounters::default(),
            config,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bootstrap
    // ═══════════════════════════════════════════════════════════════════════

    /// Allocate the process-wide tables (hint slots, global nodes).
    ///
    /// Runs once per store; later calls do nothing and return `false`. Must
    /// happen before the first fork so every child inherits the tables.
    /// Until then lookups skip the hint tier and global updates are dropped.
    pub fn bootstrap(&self) -> bool {
        let mut ran = false;
        self.hints.get_or_init(|| {
            ran = true;
            AddressHints::new(self.config.hint_slots)
        });
        self.nodes.get_or_init(GlobalNodeTable::new);

        if ran {
            log::debug!(
                "[TbCache] bootstrapped {} hint slots",
                self.hints.get().map_or(0, AddressHints::len)
            );
        }
        ran
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.hints.get().is_some()
    }

    pub fn hints(&self) -> Option<&AddressHints> {
        self.hints.get()
    }

    pub fn nodes(&self) -> Option<&GlobalNodeTable> {
        self.nodes.get()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mapped region
    // ═══════════════════════════════════════════════════════════════════════

    pub fn mapped_limit(&self) -> u64 {
        self.mapping.lock().limit
    }

    /// Raise the mapped-region bound to `end` (never lowers it).
    pub fn extend_mapping(&self, end: u64) -> u64 {
        let mut mapping = self.mapping.lock();
        mapping.limit = mapping.limit.max(end);
        mapping.limit
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Table access
    // ═══════════════════════════════════════════════════════════════════════

    pub fn contains(&self, key: &TranslationKey) -> bool {
        self.table.lock().contains_key(key)
    }

    pub fn get(&self, key: &TranslationKey) -> Option<Arc<CachedCodeUnit>> {
        self.table.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }

    /// Find the unit for `key`, translating it if nobody has yet.
    ///
    /// This is the path taken while executing; a hint hit costs one atomic
    /// load and no locks.
    pub fn lookup_or_generate<T: Translator + ?Sized>(
        &self,
        key: TranslationKey,
        translator: &T,
    ) -> Result<Lookup, TranslateError> {
        if let Some(unit) = self.hints.get().and_then(|hints| hints.probe_shared(key.pc)) {
            if unit.key() == key {
                CacheCounters::bump(&self.counters.hint_hits);
                return Ok(Lookup {
                    unit,
                    origin: LookupOrigin::Hint,
                });
            }
        }

        let mapping = self.mapping.lock();
        let mut table = self.table.lock();

        let (unit, origin) = match table.get(&key) {
            Some(unit) => {
                CacheCounters::bump(&self.counters.table_hits);
                (Arc::clone(unit), LookupOrigin::Table)
            }
            None => {
                let code = translator
                    .translate(&key)
                    .inspect_err(|_| CacheCounters::bump(&self.counters.translate_failures))?;
                let unit = Arc::new(CachedCodeUnit::new(key, code));
                table.insert(key, Arc::clone(&unit));
                CacheCounters::bump(&self.counters.generated);
                (unit, LookupOrigin::Generated)
            }
        };

        drop(mapping);
        self.publish_hint(key.pc, &unit);
        drop(table);

        Ok(Lookup { unit, origin })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Drain loop
    // ═══════════════════════════════════════════════════════════════════════

    /// Serve one request received from a child.
    pub fn prefetch<T: Translator + ?Sized>(
        &self,
        request: &TranslationRequest,
        translator: &T,
    ) -> PrefetchOutcome {
        CacheCounters::bump(&self.counters.drained);

        if request.global {
            self.global_update(request.pc);
            return PrefetchOutcome::GlobalUpdated;
        }

        let key = request.key();
        let mapping = self.mapping.lock();

        // Addresses past the mapped region come from a different layout;
        // drop them without telling the child.
        if key.pc >= mapping.limit {
            CacheCounters::bump(&self.counters.out_of_range);
            log::trace!(
                "[TbCache] dropping request for {:#x} (mapped limit {:#x})",
                key.pc,
                mapping.limit
            );
            return PrefetchOutcome::OutOfRange;
        }

        let mut table = self.table.lock();

        // The unit may have been produced since the child queued the request.
        let (unit, outcome) = match table.get(&key) {
            Some(unit) => {
                CacheCounters::bump(&self.counters.prefetch_duplicates);
                (Arc::clone(unit), PrefetchOutcome::AlreadyCached)
            }
            None => match translator.translate(&key) {
                Ok(code) => {
                    let unit = Arc::new(CachedCodeUnit::new(key, code));
                    table.insert(key, Arc::clone(&unit));
                    CacheCounters::bump(&self.counters.prefetched);
                    (unit, PrefetchOutcome::Generated)
                }
                Err(e) => {
                    CacheCounters::bump(&self.counters.translate_failures);
                    log::warn!("[TbCache] prefetch of {:#x} failed: {}", key.pc, e);
                    return PrefetchOutcome::Failed;
                }
            },
        };

        drop(mapping);
        self.publish_hint(key.pc, &unit);
        drop(table);

        log::trace!("[TbCache] {:#x}: {:?}", key.pc, outcome);
        outcome
    }

    /// Serve requests until the child closes its end of the channel.
    ///
    /// The receiver is consumed, which closes the read descriptor.
    pub fn drain<R: Read, T: Translator + ?Sized>(
        &self,
        receiver: RequestReceiver<R>,
        translator: &T,
    ) -> DrainReport {
        let mut report = DrainReport::default();

        for request in receiver {
            match request {
                Ok(request) => report.record(self.prefetch(&request, translator)),
                Err(e) => {
                    log::warn!("[TbCache] {}", e);
                    report.malformed += 1;
                }
            }
        }

        report
    }

    /// Bookkeeping-only update for a global request.
    pub fn global_update(&self, pc: u64) -> bool {
        match self.nodes.get() {
            Some(nodes) => {
                CacheCounters::bump(&self.counters.global_updates);
                nodes.update(pc)
            }
            None => {
                log::debug!("[TbCache] global update for {:#x} before bootstrap", pc);
                false
            }
        }
    }

    /// Callers hold the table lock and `unit` is in the table.
    fn publish_hint(&self, pc: u64, unit: &Arc<CachedCodeUnit>) {
        if let Some(hints) = self.hints.get() {
            hints.publish(pc, unit);
        }
    }
}

impl Default for TranslationCacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::MAX_HINT_SLOTS;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Translator that counts calls and rejects a single pc.
    #[derive(Default)]
    struct CountingTranslator {
        calls: AtomicU64,
        reject: Option<u64>,
    }

    impl Translator for CountingTranslator {
        fn translate(&self, key: &TranslationKey) -> Result<Vec<u8>, TranslateError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.reject == Some(key.pc) {
                return Err(TranslateError::Unmapped(key.pc));
            }
            Ok(key.pc.to_le_bytes().to_vec())
        }
    }

    impl CountingTranslator {
        fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    fn store() -> TranslationCacheStore {
        let store = TranslationCacheStore::new(CacheConfig {
            hint_slots: 64,
            mapped_limit: 0x10_0000,
        });
        store.bootstrap();
        store
    }

    fn encode_all(requests: &[TranslationRequest]) -> Vec<u8> {
        requests.iter().flat_map(|r| r.encode()).collect()
    }

    #[test]
    fn test_bootstrap_runs_once() {
        let store = TranslationCacheStore::default();
        assert!(!store.is_bootstrapped());
        assert!(store.bootstrap());
        assert!(!store.bootstrap());
        assert_eq!(store.hints().map(AddressHints::len), Some(4096));
    }

    #[test]
    fn test_bootstrap_clamps_hint_slots() {
        let store = TranslationCacheStore::new(CacheConfig {
            hint_slots: usize::MAX,
            ..CacheConfig::default()
        });
        assert!(store.bootstrap());
        assert_eq!(store.hints().map(AddressHints::len), Some(MAX_HINT_SLOTS));
    }

    #[test]
    fn test_lookup_generates_then_hits() {
        let store = store();
        let translator = CountingTranslator::default();
        let key = TranslationKey::new(0x1000, 0, 0);

        let first = store.lookup_or_generate(key, &translator).expect("translate");
        assert_eq!(first.origin, LookupOrigin::Generated);

        let second = store.lookup_or_generate(key, &translator).expect("translate");
        assert_eq!(second.origin, LookupOrigin::Hint);
        assert!(Arc::ptr_eq(&first.unit, &second.unit));
        assert_eq!(translator.calls(), 1);
    }

    #[test]
    fn test_hint_checks_full_key() {
        let store = store();
        let translator = CountingTranslator::default();

        store
            .lookup_or_generate(TranslationKey::new(0x1000, 0, 0), &translator)
            .expect("translate");
        let other = store
            .lookup_or_generate(TranslationKey::new(0x1000, 0, 1), &translator)
            .expect("translate");

        assert_eq!(other.origin, LookupOrigin::Generated);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_lookup_without_bootstrap_uses_table() {
        let store = TranslationCacheStore::default();
        let translator = CountingTranslator::default();
        let key = TranslationKey::new(0x1000, 0, 0);

        store.lookup_or_generate(key, &translator).expect("translate");
        let again = store.lookup_or_generate(key, &translator).expect("translate");
        assert_eq!(again.origin, LookupOrigin::Table);
    }

    #[test]
    fn test_lookup_failure_leaves_table_empty() {
        let store = store();
        let translator = CountingTranslator {
            reject: Some(0x2000),
            ..CountingTranslator::default()
        };

        let result = store.lookup_or_generate(TranslationKey::new(0x2000, 0, 0), &translator);
        assert!(matches!(result, Err(TranslateError::Unmapped(0x2000))));
        assert!(store.is_empty());
        assert_eq!(store.stats().translate_failures, 1);
    }

    #[test]
    fn test_prefetch_out_of_range_is_dropped() {
        let store = store();
        let translator = CountingTranslator::default();
        let request = TranslationRequest::block(TranslationKey::new(0x10_0000, 0, 0));

        assert_eq!(store.prefetch(&request, &translator), PrefetchOutcome::OutOfRange);
        assert!(store.is_empty());
        assert_eq!(translator.calls(), 0);
        assert!(store.hints().and_then(|h| h.probe(0x10_0000)).is_none());
    }

    #[test]
    fn test_prefetch_twice_is_idempotent() {
        let store = store();
        let translator = CountingTranslator::default();
        let request = TranslationRequest::block(TranslationKey::new(0x1000, 0, 0));

        assert_eq!(store.prefetch(&request, &translator), PrefetchOutcome::Generated);
        assert_eq!(store.prefetch(&request, &translator), PrefetchOutcome::AlreadyCached);
        assert_eq!(store.len(), 1);
        assert_eq!(translator.calls(), 1);
    }

    #[test]
    fn test_prefetch_republishes_hint() {
        let store = TranslationCacheStore::new(CacheConfig {
            hint_slots: 1,
            mapped_limit: u64::MAX,
        });
        store.bootstrap();
        let translator = CountingTranslator::default();
        let a = TranslationRequest::block(TranslationKey::new(0x1000, 0, 0));
        let b = TranslationRequest::block(TranslationKey::new(0x2000, 0, 0));

        store.prefetch(&a, &translator);
        store.prefetch(&b, &translator);
        store.prefetch(&a, &translator);

        let hints = store.hints().expect("bootstrapped");
        assert_eq!(hints.probe(0x2000).map(CachedCodeUnit::pc), Some(0x1000));
    }

    #[test]
    fn test_global_request_skips_translation() {
        let store = store();
        let translator = CountingTranslator::default();

        let outcome = store.prefetch(&TranslationRequest::global(0x20_0000), &translator);
        assert_eq!(outcome, PrefetchOutcome::GlobalUpdated);
        assert_eq!(translator.calls(), 0);
        assert!(store.nodes().expect("bootstrapped").contains(0x20_0000));
    }

    #[test]
    fn test_extend_mapping_is_monotonic() {
        let store = store();
        assert_eq!(store.extend_mapping(0x20_0000), 0x20_0000);
        assert_eq!(store.extend_mapping(0x1000), 0x20_0000);
        assert_eq!(store.mapped_limit(), 0x20_0000);
    }

    #[test]
    fn test_drain_reports_every_outcome() {
        let store = store();
        let translator = CountingTranslator {
            reject: Some(0x3000),
            ..CountingTranslator::default()
        };

        let mut bytes = encode_all(&[
            TranslationRequest::block(TranslationKey::new(0x1000, 0, 0)),
            TranslationRequest::block(TranslationKey::new(0x1000, 0, 0)),
            TranslationRequest::block(TranslationKey::new(0x3000, 0, 0)),
            TranslationRequest::block(TranslationKey::new(0xFFFF_0000, 0, 0)),
            TranslationRequest::global(0x4000),
        ]);
        let mut bad = TranslationRequest::global(0).encode();
        bad[0] = 9;
        bytes.extend_from_slice(&bad);

        let report = store.drain(RequestReceiver::new(Cursor::new(bytes)), &translator);

        assert_eq!(
            report,
            DrainReport {
                received: 5,
                global_updates: 1,
                out_of_range: 1,
                already_cached: 1,
                generated: 1,
                failed: 1,
                malformed: 1,
            }
        );
        assert_eq!(store.stats().drained, 5);
    }

    #[test]
    fn test_drain_empty_channel_returns() {
        let store = store();
        let translator = CountingTranslator::default();
        let report = store.drain(RequestReceiver::new(Cursor::new(Vec::new())), &translator);
        assert_eq!(report, DrainReport::default());
    }

    #[test]
    fn test_concurrent_lookups_generate_once() {
        let store = Arc::new(store());
        let translator = Arc::new(CountingTranslator::default());
        let key = TranslationKey::new(0x8000, 0, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let translator = Arc::clone(&translator);
                std::thread::spawn(move || {
                    store
                        .lookup_or_generate(key, translator.as_ref())
                        .expect("translate")
                        .unit
                })
            })
            .collect();

        let units: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();

        assert_eq!(translator.calls(), 1);
        assert!(units.iter().all(|u| Arc::ptr_eq(u, &units[0])));
    }
}
