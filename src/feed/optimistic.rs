//! Optimistic mutations: patch locally, write remotely, roll back on failure.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::FeedError;
use crate::store::RemoteStore;
use crate::types::{FeedEntry, JobId, JobPatch, JobStatus};

/// User actions the feed knows how to apply optimistically
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
  /// Accept a pending request
  Approve,
  /// Decline a pending request
  Reject,
  /// Release escrowed funds for payout
  ReleasePayment,
  /// Close out a paid job
  Complete,
  /// Arbitrary field update
  Patch(JobPatch),
}

impl ActionKind {
  pub fn patch(&self) -> JobPatch {
    match self {
      ActionKind::Approve => JobPatch::status(JobStatus::InProgress),
      ActionKind::Reject => JobPatch::status(JobStatus::Rejected),
      ActionKind::ReleasePayment => JobPatch::status(JobStatus::ProcessingPayment),
      ActionKind::Complete => JobPatch::status(JobStatus::Completed),
      ActionKind::Patch(patch) => patch.clone(),
    }
  }

  /// Approving or rejecting consumes the approval request, so the job leaves
  /// the list as soon as the write succeeds.
  pub fn removes_on_success(&self) -> bool {
    matches!(self, ActionKind::Approve | ActionKind::Reject)
  }
}

/// How a mutation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
  Committed(JobId),
  RolledBack(FeedError),
}

struct PendingMutation {
  patch: JobPatch,
  /// Restores the patched fields to their last known remote values
  inverse: JobPatch,
  remove_on_success: bool,
  write: Option<mpsc::UnboundedReceiver<color_eyre::Result<()>>>,
}

/// At most one mutation per job is in flight; a second is rejected until the
/// first settles.
pub struct OptimisticMutationEngine {
  store: Arc<dyn RemoteStore>,
  pending: HashMap<JobId, PendingMutation>,
}

impl OptimisticMutationEngine {
  pub fn new(store: Arc<dyn RemoteStore>) -> Self {
    Self {
      store,
      pending: HashMap::new(),
    }
  }

  pub fn is_pending(&self, id: &JobId) -> bool {
    self.pending.contains_key(id)
  }

  /// True when no remote write is outstanding. Patches applied but not yet
  /// committed don't count.
  pub fn is_idle(&self) -> bool {
    self.pending.values().all(|pending| pending.write.is_none())
  }

  /// Patch the entry in `entries` right away
  pub fn apply_optimistic(
    &mut self,
    entries: &mut [FeedEntry],
    id: &JobId,
    patch: JobPatch,
    remove_on_success: bool,
  ) -> Result<(), FeedError> {
    if self.pending.contains_key(id) {
      return Err(FeedError::MutationInFlight(id.clone()));
    }
    let entry = entries
      .iter_mut()
      .find(|entry| entry.id() == id)
      .ok_or_else(|| FeedError::UnknownEntity(id.clone()))?;

    let inverse = patch.apply(&mut entry.job);
    debug!(job = %id, "optimistic patch applied");
    self.pending.insert(
      id.clone(),
      PendingMutation {
        patch,
        inverse,
        remove_on_success,
        write: None,
      },
    );
    Ok(())
  }

  /// Issue the remote write for a patch applied with `apply_optimistic`
  pub fn commit(&mut self, id: &JobId) -> Result<(), FeedError> {
    let pending = self
      .pending
      .get_mut(id)
      .ok_or_else(|| FeedError::UnknownEntity(id.clone()))?;
    if pending.write.is_some() {
      return Err(FeedError::MutationInFlight(id.clone()));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    pending.write = Some(rx);

    let store = Arc::clone(&self.store);
    let id = id.clone();
    let patch = pending.patch.clone();
    tokio::spawn(async move {
      let result = store.update(&id, &patch).await;
      let _ = tx.send(result);
    });
    Ok(())
  }

  /// Undo a patch that was applied but never committed
  pub fn cancel(&mut self, entries: &mut [FeedEntry], id: &JobId) -> Result<(), FeedError> {
    match self.pending.get(id) {
      Some(pending) if pending.write.is_none() => {}
      Some(_) => return Err(FeedError::MutationInFlight(id.clone())),
      None => return Err(FeedError::UnknownEntity(id.clone())),
    }
    let Some(pending) = self.pending.remove(id) else {
      return Err(FeedError::UnknownEntity(id.clone()));
    };
    if let Some(entry) = entries.iter_mut().find(|entry| entry.id() == id) {
      pending.inverse.apply(&mut entry.job);
    }
    debug!(job = %id, "optimistic patch cancelled");
    Ok(())
  }

  /// Re-apply in-flight patches to freshly delivered entries so a push that
  /// beats the write doesn't undo the optimistic state. The rollback values
  /// follow the fresh remote data.
  pub fn overlay(&mut self, entries: &mut [FeedEntry]) {
    for entry in entries.iter_mut() {
      if let Some(pending) = self.pending.get_mut(entry.id()) {
        pending.inverse = pending.patch.apply(&mut entry.job);
      }
    }
  }

  /// Settle finished writes against `entries`
  pub fn poll(&mut self, entries: &mut Vec<FeedEntry>) -> Vec<MutationOutcome> {
    let mut settled = Vec::new();
    for (id, pending) in self.pending.iter_mut() {
      let Some(write) = pending.write.as_mut() else {
        continue;
      };
      match write.try_recv() {
        Ok(result) => settled.push((id.clone(), result)),
        Err(mpsc::error::TryRecvError::Empty) => {}
        Err(mpsc::error::TryRecvError::Disconnected) => {
          settled.push((id.clone(), Err(color_eyre::eyre::eyre!("write task aborted"))));
        }
      }
    }

    let mut outcomes = Vec::with_capacity(settled.len());
    for (id, result) in settled {
      let Some(pending) = self.pending.remove(&id) else {
        continue;
      };
      match result {
        Ok(()) => {
          info!(job = %id, "mutation committed");
          if pending.remove_on_success {
            entries.retain(|entry| entry.id() != &id);
          }
          outcomes.push(MutationOutcome::Committed(id));
        }
        Err(e) => {
          if let Some(entry) = entries.iter_mut().find(|entry| entry.id() == &id) {
            pending.inverse.apply(&mut entry.job);
          }
          warn!(job = %id, error = %e, "mutation failed, rolled back");
          outcomes.push(MutationOutcome::RolledBack(FeedError::mutation(id, &e)));
        }
      }
    }
    outcomes
  }

  /// Forget every pending mutation. Writes already issued still reach the
  /// store but their outcome is never applied.
  pub fn clear(&mut self) {
    self.pending.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::types::{Hydration, JobRecord, Namespace, ReferenceKey, ReferenceRecord, UserId};
  use chrono::{TimeZone, Utc};
  use std::time::Duration;

  fn entry(id: &str) -> FeedEntry {
    let at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
    FeedEntry {
      job: JobRecord {
        id: JobId::new(id),
        owner_id: UserId::new("c1"),
        provider_id: UserId::new("u1"),
        status: JobStatus::PendingApproval,
        scheduled_at: Some(at),
        amount: None,
        notes: Some("gate code 42".to_string()),
        created_at: at,
      },
      counterpart: ReferenceKey::new(Namespace::Requester, UserId::new("c1")),
      display: ReferenceRecord::named("Carla"),
      hydration: Hydration::Resolved,
    }
  }

  async fn settle(
    engine: &mut OptimisticMutationEngine,
    entries: &mut Vec<FeedEntry>,
  ) -> Vec<MutationOutcome> {
    for _ in 0..200 {
      let outcomes = engine.poll(entries);
      if !outcomes.is_empty() {
        return outcomes;
      }
      tokio::time::sleep(Duration::from_millis(2)).await;
    }
    Vec::new()
  }

  #[tokio::test]
  async fn test_failed_write_restores_exactly_the_patched_field() {
    let store = MemoryStore::new();
    store.upsert_job(entry("j1").job);
    store.set_fail_updates(true);
    let mut engine = OptimisticMutationEngine::new(Arc::new(store.clone()));
    let mut entries = vec![entry("j1")];
    let before = entries[0].clone();
    let id = JobId::new("j1");

    engine
      .apply_optimistic(&mut entries, &id, ActionKind::Approve.patch(), true)
      .unwrap();
    assert_eq!(entries[0].job.status, JobStatus::InProgress);
    engine.commit(&id).unwrap();

    let outcomes = settle(&mut engine, &mut entries).await;
    assert!(matches!(
      &outcomes[..],
      [MutationOutcome::RolledBack(FeedError::Mutation { .. })]
    ));
    assert_eq!(entries, vec![before]);
    assert!(engine.is_idle());
  }

  #[tokio::test]
  async fn test_successful_approval_leaves_list() {
    let store = MemoryStore::new();
    store.upsert_job(entry("j1").job);
    let mut engine = OptimisticMutationEngine::new(Arc::new(store.clone()));
    let mut entries = vec![entry("j1"), entry("j2")];
    let id = JobId::new("j1");

    engine
      .apply_optimistic(&mut entries, &id, ActionKind::Approve.patch(), true)
      .unwrap();
    engine.commit(&id).unwrap();

    let outcomes = settle(&mut engine, &mut entries).await;
    assert_eq!(outcomes, vec![MutationOutcome::Committed(id.clone())]);
    assert_eq!(entries.len(), 1);
    assert_eq!(store.job(&id).unwrap().status, JobStatus::InProgress);
  }

  #[tokio::test]
  async fn test_second_mutation_on_same_job_rejected() {
    let store = MemoryStore::new();
    let mut engine = OptimisticMutationEngine::new(Arc::new(store));
    let mut entries = vec![entry("j1")];
    let id = JobId::new("j1");

    engine
      .apply_optimistic(&mut entries, &id, ActionKind::Approve.patch(), true)
      .unwrap();
    let err = engine
      .apply_optimistic(&mut entries, &id, ActionKind::Reject.patch(), true)
      .unwrap_err();
    assert_eq!(err, FeedError::MutationInFlight(id.clone()));
    assert_eq!(entries[0].job.status, JobStatus::InProgress);

    let err = engine
      .apply_optimistic(&mut entries, &JobId::new("missing"), ActionKind::Approve.patch(), false)
      .unwrap_err();
    assert!(matches!(err, FeedError::UnknownEntity(_)));
  }

  #[test]
  fn test_overlay_reapplies_patch_and_tracks_new_base() {
    let store = MemoryStore::new();
    let mut engine = OptimisticMutationEngine::new(Arc::new(store));
    let mut entries = vec![entry("j1")];
    let id = JobId::new("j1");
    let patch = JobPatch {
      notes: Some(Some("updated".to_string())),
      ..JobPatch::default()
    };
    engine
      .apply_optimistic(&mut entries, &id, patch, false)
      .unwrap();

    // A push replaces the list with remote data carrying a newer note
    let mut pushed = entry("j1");
    pushed.job.notes = Some("remote edit".to_string());
    let mut fresh = vec![pushed];
    engine.overlay(&mut fresh);
    assert_eq!(fresh[0].job.notes.as_deref(), Some("updated"));

    let pending = engine.pending.get(&id).unwrap();
    assert_eq!(pending.inverse.notes, Some(Some("remote edit".to_string())));
  }

  #[test]
  fn test_uncommitted_patch_can_be_cancelled() {
    let store = MemoryStore::new();
    let mut engine = OptimisticMutationEngine::new(Arc::new(store));
    let mut entries = vec![entry("j1")];
    let before = entries[0].clone();
    let id = JobId::new("j1");

    engine
      .apply_optimistic(&mut entries, &id, ActionKind::Complete.patch(), false)
      .unwrap();
    assert!(engine.is_idle(), "nothing written yet");
    assert!(engine.is_pending(&id));

    engine.cancel(&mut entries, &id).unwrap();
    assert_eq!(entries, vec![before]);
    assert!(!engine.is_pending(&id));
    assert_eq!(
      engine.cancel(&mut entries, &id),
      Err(FeedError::UnknownEntity(id.clone()))
    );

    // The job is free for the next action
    engine
      .apply_optimistic(&mut entries, &id, ActionKind::Approve.patch(), true)
      .unwrap();
  }
}
