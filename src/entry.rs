//! Cache entry model and freshness classification.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

/// Prefix that namespaces cache entries from other persisted metadata.
pub const STORE_KEY_PREFIX: &str = "cache_";

/// Derive the persistent-store key for a cache key.
pub fn store_key(key: &str) -> String {
  format!("{STORE_KEY_PREFIX}{key}")
}

/// Recover the cache key from a persistent-store key.
/// Returns `None` for keys outside the cache namespace.
pub fn user_key(store_key: &str) -> Option<&str> {
  store_key.strip_prefix(STORE_KEY_PREFIX)
}

/// A single cached value with its expiry metadata.
///
/// Entries are never mutated in place: a refresh produces a brand-new entry
/// (new timestamp, new expiry) that fully replaces the old one under the
/// same key. Expired entries stay physically present until overwritten or
/// invalidated; expiry is a read-time classification, not a deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub key: String,
  pub data: T,
  /// Creation time, epoch milliseconds.
  pub timestamp: i64,
  /// The entry is served without a fetch only while `now < expires_at`.
  pub expires_at: i64,
}

impl<T> CacheEntry<T> {
  /// Create an entry that expires `ttl` after now.
  ///
  /// A zero or negative ttl yields an entry that is already expired. That is
  /// legal and useful: it tags the key without actually caching anything,
  /// while keeping `expires_at >= timestamp`.
  pub fn new(key: impl Into<String>, data: T, ttl: Duration) -> Self {
    let now = Utc::now().timestamp_millis();
    Self {
      key: key.into(),
      data,
      timestamp: now,
      expires_at: now + ttl.num_milliseconds().max(0),
    }
  }
}

/// Read-time classification of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Entry exists and has not expired; serve it without fetching.
  Fresh,
  /// Entry exists but its ttl has elapsed.
  Expired,
  /// No entry at this key.
  Miss,
}

impl Freshness {
  /// Classify `entry` at `now_ms` (epoch milliseconds).
  ///
  /// Expiry is exclusive at the boundary: an entry with
  /// `expires_at == now_ms` is `Expired`, never `Fresh`.
  pub fn classify<T>(entry: Option<&CacheEntry<T>>, now_ms: i64) -> Self {
    match entry {
      None => Freshness::Miss,
      Some(e) if now_ms < e.expires_at => Freshness::Fresh,
      Some(_) => Freshness::Expired,
    }
  }
}
