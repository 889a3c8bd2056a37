//! Cache layer that orchestrates read-through caching, invalidation and
//! optimistic writes over a metadata store.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::connectivity::{Connectivity, OnlineFlag};
use crate::entry::{store_key, user_key, CacheEntry, Freshness};
use crate::events::{self, CacheEvent};
use crate::store::MetadataStore;

/// Default time-to-live for cached entries: 5 minutes.
pub fn default_ttl() -> Duration {
  Duration::minutes(5)
}

/// Per-call options for [`ApiCache::fetch`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
  /// How long a freshly written entry stays fresh.
  pub ttl: Duration,
  /// Skip the cache read entirely and go straight to the fetcher.
  pub force_refresh: bool,
  /// Serve expired data immediately and refresh it in the background.
  pub stale_while_revalidate: bool,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      ttl: default_ttl(),
      force_refresh: false,
      stale_while_revalidate: false,
    }
  }
}

/// Offline-first cache sitting between application code and a remote
/// backend.
///
/// Every operation re-reads the persistent store; no in-memory snapshot of
/// entries is kept between calls. Concurrent fetches for the same key are
/// not coalesced: two simultaneous misses both invoke their fetcher. Callers
/// that need single-flight semantics must coalesce at a higher layer.
pub struct ApiCache<S: MetadataStore> {
  store: Arc<S>,
  online: Arc<dyn Connectivity>,
  events: broadcast::Sender<CacheEvent>,
}

impl<S: MetadataStore> Clone for ApiCache<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      online: Arc::clone(&self.online),
      events: self.events.clone(),
    }
  }
}

impl<S: MetadataStore + 'static> ApiCache<S> {
  /// Create a cache over the given store, assumed online until the host
  /// wires in its own connectivity signal.
  pub fn new(store: S) -> Self {
    Self {
      store: Arc::new(store),
      online: Arc::new(OnlineFlag::default()),
      events: events::channel(),
    }
  }

  /// Replace the connectivity oracle.
  pub fn with_connectivity(mut self, online: Arc<dyn Connectivity>) -> Self {
    self.online = online;
    self
  }

  /// Point-in-time read of the connectivity oracle.
  pub fn is_online(&self) -> bool {
    self.online.is_online()
  }

  /// Subscribe to notifications published by background refreshes.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  /// Read-through fetch for `key`.
  ///
  /// Returns cached data when fresh, otherwise invokes `fetcher` and caches
  /// its result. When the fetch fails, a cached entry of any age is served
  /// as a fallback; the call errors only when the fetch failed and no entry
  /// exists at all. With `stale_while_revalidate`, expired data is returned
  /// immediately and refreshed by a detached background task that publishes
  /// a [`CacheEvent`] on success.
  ///
  /// Store read/write failures are logged and absorbed; only store
  /// initialization failures propagate.
  pub async fn fetch<T, F, Fut>(&self, key: &str, fetcher: F, options: CacheOptions) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    self.store.initialize()?;

    if options.force_refresh {
      debug!(key, "force refresh, skipping cache");
    } else if let Some(entry) = self.read_entry::<T>(key) {
      let now = Utc::now().timestamp_millis();
      match Freshness::classify(Some(&entry), now) {
        Freshness::Fresh => {
          debug!(key, "cache hit");
          return Ok(entry.data);
        }
        Freshness::Expired if options.stale_while_revalidate => {
          info!(key, "stale hit, revalidating in background");
          self.spawn_revalidate(key.to_string(), fetcher, options.ttl);
          return Ok(entry.data);
        }
        _ => {
          debug!(key, "cache expired");
        }
      }
    } else {
      debug!(key, "cache miss");
    }

    match fetcher().await {
      Ok(fresh) => Ok(self.write_entry(key, fresh, options.ttl)),
      Err(fetch_err) => {
        // Any entry, however old, beats surfacing a network error. A failed
        // fallback lookup must not mask the original error either.
        if let Some(entry) = self.read_entry::<T>(key) {
          warn!(key, error = %fetch_err, "fetch failed, serving stale cache");
          return Ok(entry.data);
        }
        Err(fetch_err)
      }
    }
  }

  /// Write `local` into the cache immediately, then reconcile with the
  /// server via `updater`.
  ///
  /// Offline, the updater is never invoked and `local` is returned. When
  /// the updater succeeds its result replaces the cached value and is
  /// returned; when it fails the optimistic value is kept as current truth
  /// rather than rolled back, so the user's intent does not silently
  /// vanish. Only store initialization failures propagate.
  pub async fn optimistic_update<T, F, Fut>(
    &self,
    key: &str,
    local: T,
    updater: F,
    ttl: Option<Duration>,
  ) -> Result<T>
  where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    self.store.initialize()?;

    let ttl = ttl.unwrap_or_else(default_ttl);
    let local = self.write_entry(key, local, ttl);

    if !self.online.is_online() {
      info!(key, "offline, keeping local value without server sync");
      return Ok(local);
    }

    match updater().await {
      Ok(server) => {
        debug!(key, "server update confirmed");
        Ok(self.write_entry(key, server, ttl))
      }
      Err(e) => {
        error!(key, error = %e, "server update failed, keeping local value");
        Ok(local)
      }
    }
  }

  /// Invalidate a single key by writing an explicit null.
  ///
  /// Best-effort: errors are logged, never returned.
  pub fn invalidate(&self, key: &str) {
    let result = self
      .store
      .initialize()
      .and_then(|_| self.store.set_metadata::<serde_json::Value>(&store_key(key), None));

    match result {
      Ok(()) => info!(key, "invalidated"),
      Err(e) => error!(key, error = %e, "failed to invalidate"),
    }
  }

  /// Null every cache entry whose key matches `pattern` and return the
  /// count of invalidated entries.
  ///
  /// Patterns are wildcard/substring matches: `*` and `?` are stripped and
  /// the remainder matched as a substring, so `user:*` hits every key
  /// containing `user:`. Store failures are logged and reported as 0.
  pub fn invalidate_pattern(&self, pattern: &str) -> usize {
    match self.invalidate_matching(pattern) {
      Ok(count) => {
        info!(pattern, count, "pattern invalidation complete");
        count
      }
      Err(e) => {
        error!(pattern, error = %e, "pattern invalidation failed");
        0
      }
    }
  }

  /// Fire-and-forget variant of [`ApiCache::invalidate_pattern`]: returns
  /// immediately, the walk runs in a detached task and its errors are
  /// logged, never surfaced.
  pub fn invalidate_pattern_detached(&self, pattern: &str) {
    let cache = self.clone();
    let pattern = pattern.to_string();
    tokio::spawn(async move {
      cache.invalidate_pattern(&pattern);
    });
  }

  /// Null every cache-namespaced entry in the store and return the count.
  ///
  /// Store failures are logged and reported as 0.
  pub fn clear_all(&self) -> usize {
    match self.invalidate_matching("") {
      Ok(count) => {
        info!(count, "cleared all cache entries");
        count
      }
      Err(e) => {
        error!(error = %e, "failed to clear cache");
        0
      }
    }
  }

  /// Fire-and-forget variant of [`ApiCache::clear_all`].
  pub fn clear_all_detached(&self) {
    let cache = self.clone();
    tokio::spawn(async move {
      cache.clear_all();
    });
  }

  /// Walk all persisted keys and null the cache entries matching `pattern`.
  /// Keys outside the cache namespace are left untouched.
  fn invalidate_matching(&self, pattern: &str) -> Result<usize> {
    self.store.initialize()?;

    let needle = pattern.replace(['*', '?'], "");
    let mut count = 0;

    for persisted in self.store.metadata_keys()? {
      let Some(key) = user_key(&persisted) else {
        continue;
      };
      if key.contains(&needle) {
        debug!(key, "deleting cache entry");
        self
          .store
          .set_metadata::<serde_json::Value>(&persisted, None)?;
        count += 1;
      }
    }

    Ok(count)
  }

  /// Read the entry for `key`, treating store read failures as a miss.
  fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
    match self.store.get_metadata(&store_key(key)) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Write a new entry for `key`, absorbing store write failures. Hands the
  /// payload back so the caller can return it.
  fn write_entry<T: Serialize>(&self, key: &str, data: T, ttl: Duration) -> T {
    let entry = CacheEntry::new(key, data, ttl);
    match self.store.set_metadata(&store_key(key), Some(&entry)) {
      Ok(()) => debug!(key, ttl_ms = ttl.num_milliseconds(), "cached"),
      Err(e) => warn!(key, error = %e, "cache write failed, continuing uncached"),
    }
    entry.data
  }

  /// Refresh an expired entry in the background. On success the entry is
  /// overwritten and a [`CacheEvent`] published; on failure the stale entry
  /// stays in place and the error never reaches the original caller.
  fn spawn_revalidate<T, F, Fut>(&self, key: String, fetcher: F, ttl: Duration)
  where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let cache = self.clone();
    tokio::spawn(async move {
      match fetcher().await {
        Ok(fresh) => {
          let payload = serde_json::to_value(&fresh).unwrap_or(serde_json::Value::Null);
          cache.write_entry(&key, fresh, ttl);
          debug!(key = %key, "background refresh landed");
          let _ = cache.events.send(CacheEvent { key, data: payload });
        }
        Err(e) => {
          warn!(key = %key, error = %e, "background refresh failed, keeping stale entry");
        }
      }
    });
  }
}
