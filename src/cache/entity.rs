//! Bounded LRU of hydrated feed entries.

use std::collections::{BTreeMap, HashMap};

use crate::types::{FeedEntry, JobId};

/// Entries kept unless configured otherwise
pub const DEFAULT_CAPACITY: usize = 100;

/// A cached entry plus its recency stamp
#[derive(Debug, Clone)]
struct CacheEntry {
  entry: FeedEntry,
  touched: u64,
}

/// Least-recently-used cache of [`FeedEntry`] keyed by job id.
///
/// Purely an accelerator: a miss only means the entry gets hydrated again.
/// Entries never leave the cache by reference; `get` hands out copies.
#[derive(Debug)]
pub struct EntityCache {
  capacity: usize,
  entries: HashMap<JobId, CacheEntry>,
  // touched stamp -> key, oldest first
  recency: BTreeMap<u64, JobId>,
  clock: u64,
}

impl Default for EntityCache {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

impl EntityCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      entries: HashMap::new(),
      recency: BTreeMap::new(),
      clock: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Whether `id` is cached, without touching its recency
  pub fn contains(&self, id: &JobId) -> bool {
    self.entries.contains_key(id)
  }

  /// Look up and mark as most recently used. Never fetches.
  pub fn get(&mut self, id: &JobId) -> Option<FeedEntry> {
    let stamp = self.tick();
    let cached = self.entries.get_mut(id)?;
    self.recency.remove(&cached.touched);
    cached.touched = stamp;
    self.recency.insert(stamp, id.clone());
    Some(cached.entry.clone())
  }

  /// Insert or replace, mark as most recently used and evict the oldest
  /// entry if over capacity. Returns the evicted key.
  pub fn put(&mut self, entry: FeedEntry) -> Option<JobId> {
    let id = entry.id().clone();
    let stamp = self.tick();

    if let Some(previous) = self.entries.insert(
      id.clone(),
      CacheEntry {
        entry,
        touched: stamp,
      },
    ) {
      self.recency.remove(&previous.touched);
    }
    self.recency.insert(stamp, id);

    if self.entries.len() > self.capacity {
      if let Some((_, oldest)) = self.recency.pop_first() {
        self.entries.remove(&oldest);
        return Some(oldest);
      }
    }
    None
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.recency.clear();
  }

  /// Keys from least to most recently used
  pub fn keys_by_recency(&self) -> Vec<JobId> {
    self.recency.values().cloned().collect()
  }

  fn tick(&mut self) -> u64 {
    self.clock += 1;
    self.clock
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{
    Hydration, JobRecord, JobStatus, Namespace, ReferenceKey, ReferenceRecord, UserId,
  };
  use chrono::{TimeZone, Utc};
  use proptest::prelude::*;

  fn entry(id: &str) -> FeedEntry {
    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    FeedEntry {
      job: JobRecord {
        id: JobId::new(id),
        owner_id: UserId::new("o"),
        provider_id: UserId::new("p"),
        status: JobStatus::PendingApproval,
        scheduled_at: Some(at),
        amount: None,
        notes: None,
        created_at: at,
      },
      counterpart: ReferenceKey::new(Namespace::Requester, UserId::new("o")),
      display: ReferenceRecord::named("Olga"),
      hydration: Hydration::Resolved,
    }
  }

  #[test]
  fn test_evicts_least_recently_used() {
    let mut cache = EntityCache::new(2);
    assert_eq!(cache.put(entry("a")), None);
    assert_eq!(cache.put(entry("b")), None);

    // Touch "a" so "b" becomes the oldest
    assert!(cache.get(&JobId::new("a")).is_some());
    assert_eq!(cache.put(entry("c")), Some(JobId::new("b")));

    assert!(cache.contains(&JobId::new("a")));
    assert!(cache.contains(&JobId::new("c")));
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn test_reinsert_moves_to_most_recent() {
    let mut cache = EntityCache::new(2);
    cache.put(entry("a"));
    cache.put(entry("b"));
    cache.put(entry("a"));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.put(entry("c")), Some(JobId::new("b")));
  }

  #[test]
  fn test_miss_and_clear() {
    let mut cache = EntityCache::default();
    assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
    assert!(cache.get(&JobId::new("nope")).is_none());
    cache.put(entry("a"));
    cache.clear();
    assert!(cache.is_empty());
    assert!(cache.keys_by_recency().is_empty());
  }

  #[derive(Debug, Clone)]
  enum Op {
    Put(u8),
    Get(u8),
  }

  fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0u8..12).prop_map(Op::Put), (0u8..12).prop_map(Op::Get)]
  }

  proptest! {
    #[test]
    fn prop_matches_recency_list_model(capacity in 1usize..6, ops in prop::collection::vec(op(), 0..80)) {
      let mut cache = EntityCache::new(capacity);
      // Model: oldest first
      let mut model: Vec<String> = Vec::new();

      for op in ops {
        match op {
          Op::Put(k) => {
            let key = format!("k{}", k);
            model.retain(|m| m != &key);
            model.push(key.clone());
            let expected = if model.len() > capacity { Some(model.remove(0)) } else { None };
            let evicted = cache.put(entry(&key)).map(|id| id.0);
            prop_assert_eq!(evicted, expected);
          }
          Op::Get(k) => {
            let key = format!("k{}", k);
            let hit = cache.get(&JobId::new(key.clone())).is_some();
            let model_hit = model.contains(&key);
            prop_assert_eq!(hit, model_hit);
            if model_hit {
              model.retain(|m| m != &key);
              model.push(key);
            }
          }
        }
        prop_assert!(cache.len() <= capacity);
        let keys: Vec<String> = cache.keys_by_recency().into_iter().map(|id| id.0).collect();
        prop_assert_eq!(&keys, &model);
      }
    }
  }
}
