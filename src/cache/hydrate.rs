//! Turning raw jobs into display-ready feed entries.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{EntityCache, ReferenceCache};
use crate::error::FeedError;
use crate::types::{FeedEntry, Hydration, JobRecord, ReferenceRecord, Role};

/// Jobs hydrated for one role, with the non-fatal lookup failures encountered
#[derive(Debug, Default)]
pub struct Hydrated {
  pub entries: Vec<FeedEntry>,
  pub errors: Vec<FeedError>,
}

/// Resolves counterpart display data through both session caches.
///
/// Cheap to clone; clones share the caches.
#[derive(Clone)]
pub struct Hydrator {
  references: Arc<ReferenceCache>,
  entities: Arc<Mutex<EntityCache>>,
  placeholder: String,
}

impl Hydrator {
  pub fn new(
    references: Arc<ReferenceCache>,
    entities: Arc<Mutex<EntityCache>>,
    placeholder: impl Into<String>,
  ) -> Self {
    Self {
      references,
      entities,
      placeholder: placeholder.into(),
    }
  }

  fn entities(&self) -> MutexGuard<'_, EntityCache> {
    self.entities.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Hydrate one job as seen from `role`.
  ///
  /// Reuses the cached entry when the job is unchanged. A failed lookup still
  /// yields an entry, with placeholder display data.
  pub async fn hydrate(&self, role: Role, job: JobRecord) -> (FeedEntry, Option<FeedError>) {
    let counterpart = role.counterpart_key(&job);

    let cached = self.entities().get(&job.id);
    if let Some(cached) = cached {
      if cached.job == job
        && cached.counterpart == counterpart
        && cached.hydration != Hydration::Failed
      {
        return (cached, None);
      }
    }

    let (display, hydration, error) = match self.references.get(&counterpart).await {
      Ok(Some(record)) => (record, Hydration::Resolved, None),
      Ok(None) => (self.placeholder(), Hydration::NotFound, None),
      Err(e) => (self.placeholder(), Hydration::Failed, Some(e)),
    };

    let entry = FeedEntry {
      job,
      counterpart,
      display,
      hydration,
    };
    let evicted = self.entities().put(entry.clone());
    if let Some(evicted) = evicted {
      debug!(job = %evicted, "evicted from entity cache");
    }
    (entry, error)
  }

  /// Hydrate a batch, preserving order. Records without `scheduled_at` are
  /// dropped rather than reported.
  pub async fn hydrate_all(&self, role: Role, jobs: Vec<JobRecord>) -> Hydrated {
    let wellformed: Vec<JobRecord> = jobs
      .into_iter()
      .filter(|job| {
        if job.scheduled_at.is_none() {
          debug!(job = %job.id, "dropping job without scheduledAt");
          false
        } else {
          true
        }
      })
      .collect();

    let results =
      futures::future::join_all(wellformed.into_iter().map(|job| self.hydrate(role, job))).await;

    let mut hydrated = Hydrated::default();
    for (entry, error) in results {
      hydrated.entries.push(entry);
      hydrated.errors.extend(error);
    }
    hydrated
  }

  fn placeholder(&self) -> ReferenceRecord {
    ReferenceRecord::named(self.placeholder.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::types::{JobId, JobStatus, Namespace, ReferenceKey, UserId};
  use chrono::{TimeZone, Utc};

  fn job(id: &str, owner: &str) -> JobRecord {
    let at = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
    JobRecord {
      id: JobId::new(id),
      owner_id: UserId::new(owner),
      provider_id: UserId::new("p1"),
      status: JobStatus::PendingApproval,
      scheduled_at: Some(at),
      amount: None,
      notes: None,
      created_at: at,
    }
  }

  fn hydrator(store: &MemoryStore) -> (Hydrator, Arc<Mutex<EntityCache>>) {
    let entities = Arc::new(Mutex::new(EntityCache::new(10)));
    let references = Arc::new(ReferenceCache::new(Arc::new(store.clone())));
    (
      Hydrator::new(references, Arc::clone(&entities), "Unknown"),
      entities,
    )
  }

  #[tokio::test]
  async fn test_fulfiller_resolves_requester_name() {
    let store = MemoryStore::new();
    store.put_reference(
      ReferenceKey::new(Namespace::Requester, UserId::new("o1")),
      ReferenceRecord::named("Olga"),
    );
    let (hydrator, entities) = hydrator(&store);

    let (entry, error) = hydrator.hydrate(Role::Fulfiller, job("j1", "o1")).await;
    assert!(error.is_none());
    assert_eq!(entry.display_name(), "Olga");
    assert_eq!(entry.hydration, Hydration::Resolved);
    assert!(entities.lock().unwrap().contains(&JobId::new("j1")));
  }

  #[tokio::test]
  async fn test_shared_counterpart_read_once_per_batch() {
    let store = MemoryStore::new();
    store.put_reference(
      ReferenceKey::new(Namespace::Requester, UserId::new("o1")),
      ReferenceRecord::named("Olga"),
    );
    store.set_latency(std::time::Duration::from_millis(10));
    let (hydrator, _) = hydrator(&store);

    let jobs = (0..6).map(|i| job(&format!("j{}", i), "o1")).collect();
    let hydrated = hydrator.hydrate_all(Role::Fulfiller, jobs).await;
    assert_eq!(hydrated.entries.len(), 6);
    assert_eq!(store.reference_reads(), 1);
  }

  #[tokio::test]
  async fn test_malformed_dropped_and_failures_use_placeholder() {
    let store = MemoryStore::new();
    store.set_fail_reads(true);
    let (hydrator, entities) = hydrator(&store);

    let mut malformed = job("bad", "o1");
    malformed.scheduled_at = None;
    let hydrated = hydrator
      .hydrate_all(Role::Fulfiller, vec![job("ok", "o1"), malformed])
      .await;

    assert_eq!(hydrated.entries.len(), 1);
    assert_eq!(hydrated.entries[0].display_name(), "Unknown");
    assert_eq!(hydrated.entries[0].hydration, Hydration::Failed);
    assert_eq!(hydrated.errors.len(), 1);

    // Failed entries are re-hydrated next time
    store.set_fail_reads(false);
    let (entry, error) = hydrator.hydrate(Role::Fulfiller, job("ok", "o1")).await;
    assert!(error.is_none());
    assert_eq!(entry.hydration, Hydration::NotFound);
    assert_eq!(entities.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_unchanged_job_served_from_entity_cache() {
    let store = MemoryStore::new();
    let (hydrator, entities) = hydrator(&store);
    let (mut cached, _) = hydrator.hydrate(Role::Fulfiller, job("j1", "o1")).await;

    // Mark the cached copy so a fresh hydration would be told apart
    cached.display = ReferenceRecord::named("From cache");
    entities.lock().unwrap().put(cached);
    hydrator.references.clear();
    let reads = store.reference_reads();

    let (entry, error) = hydrator.hydrate(Role::Fulfiller, job("j1", "o1")).await;
    assert!(error.is_none());
    assert_eq!(entry.display_name(), "From cache");
    assert_eq!(store.reference_reads(), reads);

    // A changed job is hydrated again
    let mut edited = job("j1", "o1");
    edited.notes = Some("moved to 10:00".to_string());
    let (entry, _) = hydrator.hydrate(Role::Fulfiller, edited).await;
    assert_eq!(entry.display_name(), "Unknown");
    assert_eq!(store.reference_reads(), reads + 1);

    // Same job seen from the other side needs the other party's record
    let (entry, _) = hydrator.hydrate(Role::Requester, job("j1", "o1")).await;
    assert_eq!(entry.counterpart.namespace, Namespace::Fulfiller);
    assert_ne!(entry.display_name(), "From cache");
  }
}
