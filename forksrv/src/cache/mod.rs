//! Translation cache kept warm across fork rounds.
//!
//! Two tiers:
//!
//! - **Table:** `(pc, cs_base, flags)` → compiled unit, guarded by the table
//!   lock. This is the source of truth; a unit is inserted once and the first
//!   writer wins.
//! - **Hint slots:** direct-mapped by pc hash, one pointer per bucket,
//!   written under the table lock and read with a single atomic load. Stale
//!   entries are fine, callers check the key.
//!
//! ## Round lifecycle
//!
//! ```text
//!   engine (parent)                       child
//!   ───────────────                       ─────
//!   bootstrap()
//!   fork ───────────────────────────────▶ inherits table + hints (COW)
//!   drain(receiver) ◀──── requests ─────  lookup_or_generate() on miss
//!     prefetch(): mapping → table           ↳ submit(request)
//!   child closes pipe, drain returns      exit
//!   fork ───────────────────────────────▶ next child starts warmer
//! ```

pub mod hints;
pub mod nodes;
pub mod store;
pub mod types;

pub use hints::AddressHints;
pub use nodes::GlobalNodeTable;
pub use store::TranslationCacheStore;
pub use types::{
    CacheConfig, CacheStats, CachedCodeUnit, DrainReport, Lookup, LookupOrigin, PrefetchOutcome,
    Translator, DEFAULT_HINT_SLOTS, DEFAULT_MAPPED_LIMIT, MAX_HINT_SLOTS,
};
