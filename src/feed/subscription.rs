//! The single live subscription backing the active view.
//!
//! Lifecycle: `Inactive -> Subscribing -> Active -> (Error | Inactive)`.
//! `activate` always tears the previous subscription down before opening a
//! new one, which is what keeps at most one active per feed.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::query_spec::QuerySpec;
use crate::cache::Hydrator;
use crate::error::FeedError;
use crate::store::RemoteStore;
use crate::types::FeedEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
  Inactive,
  Subscribing,
  Active,
  /// Delivery failed; stays here until re-activated
  Error(FeedError),
}

/// Messages from the forwarding task
enum Delivery {
  Opened,
  Snapshot(Vec<FeedEntry>, Vec<FeedError>),
  Failed(FeedError),
}

/// What the feed has to act on after a poll
#[derive(Debug)]
pub enum SubscriptionUpdate {
  /// Complete replacement for the materialized list
  Snapshot {
    generation: u64,
    entries: Vec<FeedEntry>,
    hydration_errors: Vec<FeedError>,
  },
  Failed {
    generation: u64,
    error: FeedError,
  },
}

pub struct SubscriptionManager {
  store: Arc<dyn RemoteStore>,
  hydrator: Hydrator,
  state: SubscriptionState,
  spec: Option<QuerySpec>,
  generation: u64,
  deliveries: Option<mpsc::UnboundedReceiver<Delivery>>,
  release: Option<oneshot::Sender<()>>,
}

impl SubscriptionManager {
  pub fn new(store: Arc<dyn RemoteStore>, hydrator: Hydrator) -> Self {
    Self {
      store,
      hydrator,
      state: SubscriptionState::Inactive,
      spec: None,
      generation: 0,
      deliveries: None,
      release: None,
    }
  }

  pub fn state(&self) -> &SubscriptionState {
    &self.state
  }

  /// Query of the current (or last failed) subscription
  pub fn spec(&self) -> Option<&QuerySpec> {
    self.spec.as_ref()
  }

  pub fn is_live(&self) -> bool {
    matches!(
      self.state,
      SubscriptionState::Subscribing | SubscriptionState::Active
    )
  }

  /// Replace whatever is running with a subscription to `spec`
  pub fn activate(&mut self, spec: QuerySpec, generation: u64) {
    self.teardown();

    let (tx, rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = oneshot::channel();
    self.deliveries = Some(rx);
    self.release = Some(release_tx);
    self.generation = generation;
    self.state = SubscriptionState::Subscribing;
    info!(query = %spec.fingerprint(), generation, "subscribing");

    tokio::spawn(forward(
      Arc::clone(&self.store),
      self.hydrator.clone(),
      spec.clone(),
      tx,
      release_rx,
    ));
    self.spec = Some(spec);
  }

  /// Release the subscription. Deliveries still queued are discarded.
  pub fn teardown(&mut self) {
    if let Some(release) = self.release.take() {
      let _ = release.send(());
    }
    self.deliveries = None;
    if self.state != SubscriptionState::Inactive {
      info!(generation = self.generation, "subscription released");
    }
    self.state = SubscriptionState::Inactive;
  }

  /// Drain pending deliveries, updating the lifecycle state
  pub fn poll(&mut self) -> Vec<SubscriptionUpdate> {
    let mut updates = Vec::new();
    let Some(deliveries) = self.deliveries.as_mut() else {
      return updates;
    };

    let mut failure = None;
    loop {
      match deliveries.try_recv() {
        Ok(Delivery::Opened) => {
          debug!(generation = self.generation, "subscription active");
          self.state = SubscriptionState::Active;
        }
        Ok(Delivery::Snapshot(entries, hydration_errors)) => {
          updates.push(SubscriptionUpdate::Snapshot {
            generation: self.generation,
            entries,
            hydration_errors,
          });
        }
        Ok(Delivery::Failed(error)) => {
          failure = Some(error);
          break;
        }
        Err(mpsc::error::TryRecvError::Empty) => break,
        Err(mpsc::error::TryRecvError::Disconnected) => {
          failure = Some(FeedError::Subscription(
            "subscription ended unexpectedly".to_string(),
          ));
          break;
        }
      }
    }

    if let Some(error) = failure {
      warn!(generation = self.generation, error = %error, "subscription failed");
      self.deliveries = None;
      self.release = None;
      self.state = SubscriptionState::Error(error.clone());
      updates.push(SubscriptionUpdate::Failed {
        generation: self.generation,
        error,
      });
    }
    updates
  }
}

impl Drop for SubscriptionManager {
  fn drop(&mut self) {
    self.teardown();
  }
}

/// Open the subscription, hydrate every snapshot and hand it to the manager
/// until released or the store gives up.
async fn forward(
  store: Arc<dyn RemoteStore>,
  hydrator: Hydrator,
  spec: QuerySpec,
  tx: mpsc::UnboundedSender<Delivery>,
  mut release: oneshot::Receiver<()>,
) {
  let mut subscription = match store.subscribe(&spec).await {
    Ok(subscription) => subscription,
    Err(e) => {
      let _ = tx.send(Delivery::Failed(FeedError::subscription(&e)));
      return;
    }
  };
  if tx.send(Delivery::Opened).is_err() {
    subscription.unsubscribe();
    return;
  }

  loop {
    tokio::select! {
      // Fires on explicit release and when the manager is dropped
      _ = &mut release => break,
      next = subscription.next_snapshot() => match next {
        Some(Ok(records)) => {
          let hydrated = hydrator.hydrate_all(spec.role, records).await;
          let delivery = Delivery::Snapshot(hydrated.entries, hydrated.errors);
          if tx.send(delivery).is_err() {
            break;
          }
        }
        Some(Err(e)) => {
          let _ = tx.send(Delivery::Failed(FeedError::subscription(&e)));
          break;
        }
        None => {
          let _ = tx.send(Delivery::Failed(FeedError::Subscription(
            "store closed the subscription".to_string(),
          )));
          break;
        }
      }
    }
  }

  subscription.unsubscribe();
  debug!(query = %spec.fingerprint(), "subscription handle released");
}
