//! In-process remote store.
//!
//! Honours the same contracts as a real document store: ordered pages with
//! opaque cursors, a full snapshot to every matching subscriber on each
//! change, point reads and patch writes. Faults and latency can be injected.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{CursorToken, Page, RemoteStore, Subscription};
use crate::feed::{OrderingKey, QuerySpec};
use crate::types::{JobId, JobPatch, JobRecord, ReferenceKey, ReferenceRecord};

struct Subscriber {
  id: u64,
  spec: QuerySpec,
  tx: mpsc::UnboundedSender<Result<Vec<JobRecord>>>,
}

#[derive(Default)]
struct Faults {
  fail_queries: bool,
  fail_reads: bool,
  fail_updates: bool,
}

#[derive(Default)]
struct State {
  jobs: BTreeMap<JobId, JobRecord>,
  references: HashMap<ReferenceKey, ReferenceRecord>,
  subscribers: Vec<Subscriber>,
  next_subscriber: u64,
  faults: Faults,
  latency: Duration,
  reference_reads: usize,
  queries: usize,
}

impl State {
  fn snapshot(&self, spec: &QuerySpec) -> Vec<JobRecord> {
    let mut jobs: Vec<JobRecord> = self
      .jobs
      .values()
      .filter(|job| spec.matches(job))
      .cloned()
      .collect();
    spec.sort_jobs(&mut jobs);
    jobs
  }

  fn notify(&mut self) {
    let snapshots: Vec<(u64, Vec<JobRecord>)> = self
      .subscribers
      .iter()
      .map(|s| (s.id, self.snapshot(&s.spec)))
      .collect();

    // Subscribers whose receiver is gone are pruned
    self.subscribers.retain(|s| {
      snapshots
        .iter()
        .find(|(id, _)| *id == s.id)
        .map(|(_, jobs)| s.tx.send(Ok(jobs.clone())).is_ok())
        .unwrap_or(false)
    });
  }
}

/// Cloneable handle to a shared in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<State>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, State>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn lock_quiet(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Insert or replace a job and notify subscribers
  pub fn upsert_job(&self, job: JobRecord) {
    let mut state = self.lock_quiet();
    state.jobs.insert(job.id.clone(), job);
    state.notify();
  }

  /// Insert many jobs with a single notification
  pub fn seed_jobs(&self, jobs: impl IntoIterator<Item = JobRecord>) {
    let mut state = self.lock_quiet();
    for job in jobs {
      state.jobs.insert(job.id.clone(), job);
    }
    state.notify();
  }

  pub fn remove_job(&self, id: &JobId) -> Option<JobRecord> {
    let mut state = self.lock_quiet();
    let removed = state.jobs.remove(id);
    if removed.is_some() {
      state.notify();
    }
    removed
  }

  pub fn job(&self, id: &JobId) -> Option<JobRecord> {
    self.lock_quiet().jobs.get(id).cloned()
  }

  pub fn put_reference(&self, key: ReferenceKey, record: ReferenceRecord) {
    self.lock_quiet().references.insert(key, record);
  }

  pub fn set_fail_queries(&self, fail: bool) {
    self.lock_quiet().faults.fail_queries = fail;
  }

  pub fn set_fail_reads(&self, fail: bool) {
    self.lock_quiet().faults.fail_reads = fail;
  }

  pub fn set_fail_updates(&self, fail: bool) {
    self.lock_quiet().faults.fail_updates = fail;
  }

  /// Delay applied to every remote call
  pub fn set_latency(&self, latency: Duration) {
    self.lock_quiet().latency = latency;
  }

  /// Push a delivery error to every live subscriber and drop them
  pub fn break_subscriptions(&self, reason: &str) {
    let mut state = self.lock_quiet();
    for subscriber in state.subscribers.drain(..) {
      let _ = subscriber.tx.send(Err(eyre!("{}", reason)));
    }
  }

  /// Number of point reads served so far
  pub fn reference_reads(&self) -> usize {
    self.lock_quiet().reference_reads
  }

  /// Number of paginated queries served so far
  pub fn queries(&self) -> usize {
    self.lock_quiet().queries
  }

  pub fn active_subscriptions(&self) -> usize {
    self.lock_quiet().subscribers.len()
  }

  async fn simulate_latency(&self) {
    let latency = self.lock_quiet().latency;
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }
  }
}

fn encode_cursor(key: &OrderingKey) -> Result<CursorToken> {
  let raw = serde_json::to_string(key).map_err(|e| eyre!("Failed to encode cursor: {}", e))?;
  Ok(CursorToken(raw))
}

fn decode_cursor(token: &CursorToken) -> Result<OrderingKey> {
  serde_json::from_str(&token.0).map_err(|e| eyre!("Invalid cursor: {}", e))
}

#[async_trait]
impl RemoteStore for MemoryStore {
  async fn query(&self, spec: &QuerySpec, cursor: Option<&CursorToken>) -> Result<Page> {
    self.simulate_latency().await;

    let after = cursor.map(decode_cursor).transpose()?;
    let mut state = self.lock()?;
    state.queries += 1;
    if state.faults.fail_queries {
      return Err(eyre!("query unavailable"));
    }

    let records: Vec<JobRecord> = state
      .snapshot(spec)
      .into_iter()
      .filter(|job| match &after {
        Some(after) => spec.compare(&OrderingKey::of(job), after).is_gt(),
        None => true,
      })
      .take(spec.page_size)
      .collect();

    let next = match records.last() {
      Some(last) => Some(encode_cursor(&OrderingKey::of(last))?),
      None => None,
    };

    debug!(
      query = %spec.fingerprint(),
      returned = records.len(),
      "memory store served page"
    );
    Ok(Page { records, next })
  }

  async fn subscribe(&self, spec: &QuerySpec) -> Result<Subscription> {
    self.simulate_latency().await;

    let (tx, rx) = mpsc::unbounded_channel();
    let id = {
      let mut state = self.lock()?;
      let id = state.next_subscriber;
      state.next_subscriber += 1;
      state.subscribers.push(Subscriber {
        id,
        spec: spec.clone(),
        tx,
      });
      id
    };

    let state = Arc::clone(&self.state);
    Ok(Subscription::new(rx, move || {
      let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
      state.subscribers.retain(|s| s.id != id);
    }))
  }

  async fn get_by_id(&self, key: &ReferenceKey) -> Result<Option<ReferenceRecord>> {
    {
      let mut state = self.lock()?;
      state.reference_reads += 1;
    }
    self.simulate_latency().await;

    let state = self.lock()?;
    if state.faults.fail_reads {
      return Err(eyre!("reference read of {} failed", key));
    }
    Ok(state.references.get(key).cloned())
  }

  async fn update(&self, id: &JobId, patch: &JobPatch) -> Result<()> {
    self.simulate_latency().await;

    let mut state = self.lock()?;
    if state.faults.fail_updates {
      return Err(eyre!("write to job {} rejected", id));
    }
    let job = state
      .jobs
      .get_mut(id)
      .ok_or_else(|| eyre!("job {} not found", id))?;
    patch.apply(job);
    state.notify();
    Ok(())
  }
}
