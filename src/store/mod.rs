//! Collaborators the feed consumes: the remote document store and the
//! identity provider.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::feed::QuerySpec;
use crate::types::{JobId, JobPatch, JobRecord, ReferenceKey, ReferenceRecord, Role, UserId};

/// Opaque continuation token handed out by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorToken(pub String);

/// One page of a paginated query
#[derive(Debug, Clone, Default)]
pub struct Page {
  /// Records in query order
  pub records: Vec<JobRecord>,
  /// Resume point after the last record, if any record was returned
  pub next: Option<CursorToken>,
}

/// Stream of full ordered result sets for a standing query
type SnapshotReceiver = mpsc::UnboundedReceiver<Result<Vec<JobRecord>>>;

/// Handle on a live query.
///
/// Every item is the complete ordered result set at that moment. Dropping the
/// handle releases it; `unsubscribe` does so explicitly.
pub struct Subscription {
  snapshots: SnapshotReceiver,
  release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  pub fn new(snapshots: SnapshotReceiver, release: impl FnOnce() + Send + 'static) -> Self {
    Self {
      snapshots,
      release: Some(Box::new(release)),
    }
  }

  /// Wait for the next snapshot. `None` means the store closed the channel.
  pub async fn next_snapshot(&mut self) -> Option<Result<Vec<JobRecord>>> {
    self.snapshots.recv().await
  }

  pub fn unsubscribe(mut self) {
    self.release_handle();
  }

  fn release_handle(&mut self) {
    if let Some(release) = self.release.take() {
      release();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release_handle();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("released", &self.release.is_none())
      .finish_non_exhaustive()
  }
}

/// Remote document store.
///
/// Consistency is the store's business: queries and snapshots follow the
/// query's sort, writes become visible eventually.
#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// Fetch one page of `spec`, resuming after `cursor` when given
  async fn query(&self, spec: &QuerySpec, cursor: Option<&CursorToken>) -> Result<Page>;

  /// Open a live query; snapshots are delivered on every change
  async fn subscribe(&self, spec: &QuerySpec) -> Result<Subscription>;

  /// Point read of a reference record. `Ok(None)` means not found.
  async fn get_by_id(&self, key: &ReferenceKey) -> Result<Option<ReferenceRecord>>;

  /// Apply `patch` to the job
  async fn update(&self, id: &JobId, patch: &JobPatch) -> Result<()>;
}

/// Who is logged in and which side they are acting as
pub trait Identity: Send + Sync {
  fn current_user_id(&self) -> UserId;
  fn current_user_role(&self) -> Role;
}

/// Fixed identity, for the CLI and tests
#[derive(Debug, Clone)]
pub struct StaticIdentity {
  pub user_id: UserId,
  pub role: Role,
}

impl Identity for StaticIdentity {
  fn current_user_id(&self) -> UserId {
    self.user_id.clone()
  }

  fn current_user_role(&self) -> Role {
    self.role
  }
}
