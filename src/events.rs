//! Cache-updated notifications.

use tokio::sync::broadcast;

/// Capacity of the notification channel. Slow subscribers lag (dropping
/// their oldest events) rather than block the publisher.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Published whenever a background (stale-while-revalidate) refresh
/// successfully replaces stale data, so observers can update without
/// polling the cache.
#[derive(Debug, Clone)]
pub struct CacheEvent {
  /// The cache key that was refreshed.
  pub key: String,
  /// The fresh payload, type-erased to JSON.
  pub data: serde_json::Value,
}

pub(crate) fn channel() -> broadcast::Sender<CacheEvent> {
  broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
