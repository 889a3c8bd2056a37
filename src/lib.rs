//! Offline-first read-through cache for remote API data.
//!
//! Sits between application code and a remote backend, on top of a
//! persistent key-value store:
//! - Read-through caching with per-call TTL
//! - Stale-while-revalidate with background refresh notifications
//! - Stale-cache fallback when the network fails
//! - Optimistic local writes reconciled against server responses
//! - Exact-key and pattern invalidation, awaited or fire-and-forget
//!
//! Payloads are opaque JSON-serializable values; the cache never inspects
//! their shape. The remote fetch and update operations are caller-supplied
//! async callbacks.

mod connectivity;
mod entry;
mod events;
mod layer;
mod store;

pub use connectivity::{Connectivity, OnlineFlag};
pub use entry::{store_key, CacheEntry, Freshness, STORE_KEY_PREFIX};
pub use events::CacheEvent;
pub use layer::{default_ttl, ApiCache, CacheOptions};
pub use store::{MemoryStore, MetadataStore, SqliteStore};
