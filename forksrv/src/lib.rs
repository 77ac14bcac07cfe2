pub mod cache;
pub mod channel;
pub mod error;
pub mod request;
pub mod server;
pub mod session;

pub use cache::{
    CacheConfig, CacheStats, CachedCodeUnit, DrainReport, Lookup, LookupOrigin, PrefetchOutcome,
    TranslationCacheStore, Translator,
};
pub use channel::{RequestReceiver, RequestSender};
pub use error::{ForkServerError, TranslateError, WireError};
pub use request::{REQUEST_WIRE_LEN, TranslationKey, TranslationRequest};
pub use server::{DriverLink, ForkServer, ForkServerConfig, OsFork, ProcessRole, Split, Splitter};
pub use session::TargetSession;
