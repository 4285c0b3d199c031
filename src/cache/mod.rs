//! Generational response cache.
//!
//! This module provides the storage side of the offline proxy:
//! - Named generations (`static-<version>`, `dynamic-<version>`) of request/response entries
//! - Entries keyed by method, URL and `Vary`-selected request headers, last write wins
//! - Lookups restricted to the active version's generations
//! - Allow-list purge of whole generations at activation

mod generations;
mod storage;
mod traits;

pub use generations::{GenerationManager, GenerationName, Purpose};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource, CacheStorage, CachedEntry};
