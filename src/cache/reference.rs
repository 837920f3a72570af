//! Memo of counterpart display records with coalesced lookups.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::store::RemoteStore;
use crate::types::{ReferenceKey, ReferenceRecord};

/// Result of a point read: `None` is a cached "not found"
pub type Lookup = Option<ReferenceRecord>;

type PendingLookup = Shared<BoxFuture<'static, Result<Lookup, String>>>;

enum Slot {
  Ready(Lookup),
  Pending(PendingLookup),
}

/// Never evicts on its own; `clear` on logout.
///
/// Concurrent misses on one key share a single in-flight read. "Not found" is
/// remembered like any other answer; failed reads are not, so they can be
/// retried later.
pub struct ReferenceCache {
  store: Arc<dyn RemoteStore>,
  slots: Mutex<HashMap<ReferenceKey, Slot>>,
}

impl ReferenceCache {
  pub fn new(store: Arc<dyn RemoteStore>) -> Self {
    Self {
      store,
      slots: Mutex::new(HashMap::new()),
    }
  }

  fn slots(&self) -> MutexGuard<'_, HashMap<ReferenceKey, Slot>> {
    self.slots.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Resolved value for `key`, if present. Never reads remotely.
  pub fn peek(&self, key: &ReferenceKey) -> Option<Lookup> {
    match self.slots().get(key) {
      Some(Slot::Ready(lookup)) => Some(lookup.clone()),
      _ => None,
    }
  }

  /// Resolved value for `key`, reading remotely on a miss.
  pub async fn get(&self, key: &ReferenceKey) -> Result<Lookup, FeedError> {
    let pending = {
      let mut slots = self.slots();
      match slots.get(key) {
        Some(Slot::Ready(lookup)) => return Ok(lookup.clone()),
        Some(Slot::Pending(pending)) => pending.clone(),
        None => {
          debug!(key = %key, "reference miss, reading remotely");
          let store = Arc::clone(&self.store);
          let owned_key = key.clone();
          let pending = async move {
            store
              .get_by_id(&owned_key)
              .await
              .map_err(|e| format!("{:#}", e))
          }
          .boxed()
          .shared();
          slots.insert(key.clone(), Slot::Pending(pending.clone()));
          pending
        }
      }
    };

    let outcome = pending.clone().await;

    let mut slots = self.slots();
    // A clear() or a newer lookup may have replaced the slot meanwhile
    let still_ours = matches!(slots.get(key), Some(Slot::Pending(p)) if p.ptr_eq(&pending));
    match outcome {
      Ok(lookup) => {
        if still_ours {
          slots.insert(key.clone(), Slot::Ready(lookup.clone()));
        }
        Ok(lookup)
      }
      Err(reason) => {
        if still_ours {
          slots.remove(key);
        }
        warn!(key = %key, error = %reason, "reference lookup failed");
        Err(FeedError::Hydration {
          key: key.clone(),
          reason,
        })
      }
    }
  }

  /// Number of resolved entries
  pub fn len(&self) -> usize {
    self
      .slots()
      .values()
      .filter(|slot| matches!(slot, Slot::Ready(_)))
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Forget everything, including reads still in flight
  pub fn clear(&self) {
    self.slots().clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::types::{Namespace, UserId};
  use std::time::Duration;

  fn key(id: &str) -> ReferenceKey {
    ReferenceKey::new(Namespace::Requester, UserId::new(id))
  }

  #[tokio::test]
  async fn test_concurrent_misses_share_one_read() {
    let store = MemoryStore::new();
    store.put_reference(key("c1"), ReferenceRecord::named("Carla"));
    store.set_latency(Duration::from_millis(20));
    let cache = ReferenceCache::new(Arc::new(store.clone()));

    let wanted = key("c1");
    let lookups = (0..8).map(|_| cache.get(&wanted));
    let results = futures::future::join_all(lookups).await;

    assert_eq!(store.reference_reads(), 1);
    for result in results {
      assert_eq!(result.unwrap().unwrap().display_name, "Carla");
    }
    assert_eq!(
      cache.peek(&wanted),
      Some(Some(ReferenceRecord::named("Carla")))
    );
  }

  #[tokio::test]
  async fn test_concurrent_misses_across_tasks_share_one_read() {
    let store = MemoryStore::new();
    store.put_reference(key("c1"), ReferenceRecord::named("Carla"));
    store.set_latency(Duration::from_millis(20));
    let cache = Arc::new(ReferenceCache::new(Arc::new(store.clone())));

    let handles: Vec<_> = (0..5)
      .map(|_| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(&key("c1")).await })
      })
      .collect();
    for handle in handles {
      assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(store.reference_reads(), 1);
  }

  #[tokio::test]
  async fn test_not_found_is_cached() {
    let store = MemoryStore::new();
    let cache = ReferenceCache::new(Arc::new(store.clone()));

    assert_eq!(cache.get(&key("ghost")).await.unwrap(), None);
    assert_eq!(cache.get(&key("ghost")).await.unwrap(), None);
    assert_eq!(store.reference_reads(), 1);
    assert_eq!(cache.len(), 1);
  }

  #[tokio::test]
  async fn test_namespaces_do_not_collide() {
    let store = MemoryStore::new();
    let requester = ReferenceKey::new(Namespace::Requester, UserId::new("same"));
    let fulfiller = ReferenceKey::new(Namespace::Fulfiller, UserId::new("same"));
    store.put_reference(requester.clone(), ReferenceRecord::named("Client"));
    let cache = ReferenceCache::new(Arc::new(store));

    assert_eq!(cache.get(&requester).await.unwrap().unwrap().display_name, "Client");
    assert_eq!(cache.get(&fulfiller).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_failure_is_not_cached() {
    let store = MemoryStore::new();
    store.put_reference(key("c1"), ReferenceRecord::named("Carla"));
    store.set_fail_reads(true);
    let cache = ReferenceCache::new(Arc::new(store.clone()));

    let err = cache.get(&key("c1")).await.unwrap_err();
    assert!(matches!(err, FeedError::Hydration { .. }));
    assert!(cache.is_empty());

    store.set_fail_reads(false);
    assert!(cache.get(&key("c1")).await.unwrap().is_some());
    assert_eq!(store.reference_reads(), 2);
  }

  #[tokio::test]
  async fn test_clear_forgets_entries() {
    let store = MemoryStore::new();
    store.put_reference(key("c1"), ReferenceRecord::named("Carla"));
    let cache = ReferenceCache::new(Arc::new(store.clone()));

    cache.get(&key("c1")).await.unwrap();
    cache.clear();
    assert!(cache.peek(&key("c1")).is_none());
    cache.get(&key("c1")).await.unwrap();
    assert_eq!(store.reference_reads(), 2);
  }
}
