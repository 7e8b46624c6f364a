//! Persistent response cache
//!
//! Responses are keyed by a content hash of the normalized request and
//! stored in SQLite, optionally gzip-compressed. Entries are never evicted
//! by size or age; removal is an explicit clear.

pub mod compression;
pub mod key;
pub mod manager;
pub mod normalize;
pub mod storage;

// Re-export main types
pub use key::cache_key;
pub use manager::CacheManager;
pub use normalize::normalize;
pub use storage::{CacheEntry, CacheStorage, ClearStats, TableStats};
