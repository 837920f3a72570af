//! Domain types shared by the caches, the store collaborators and the feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote-store assigned job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Identifier of a requesting or fulfilling party
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Currency quantity in minor units (cents)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
  pub minor: i64,
  pub currency: String,
}

/// Job lifecycle state.
///
/// Transitions are driven by the external workflow:
/// pendingApproval -> {inProgress, rejected}, inProgress -> {inEscrow, paymentFailed},
/// inEscrow -> processingPayment -> paid -> completed.
/// Values this build doesn't know are kept verbatim in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
  PendingApproval,
  InProgress,
  Rejected,
  InEscrow,
  PaymentFailed,
  ProcessingPayment,
  Paid,
  Completed,
  Unknown(String),
}

impl JobStatus {
  /// Wire name as stored remotely
  pub fn as_str(&self) -> &str {
    match self {
      JobStatus::PendingApproval => "pendingApproval",
      JobStatus::InProgress => "inProgress",
      JobStatus::Rejected => "rejected",
      JobStatus::InEscrow => "inEscrow",
      JobStatus::PaymentFailed => "paymentFailed",
      JobStatus::ProcessingPayment => "processingPayment",
      JobStatus::Paid => "paid",
      JobStatus::Completed => "completed",
      JobStatus::Unknown(raw) => raw,
    }
  }

  /// Badge text for list rendering
  pub fn label(&self) -> &'static str {
    match self {
      JobStatus::PendingApproval => "Pending approval",
      JobStatus::InProgress => "In progress",
      JobStatus::Rejected => "Rejected",
      JobStatus::InEscrow => "In escrow",
      JobStatus::PaymentFailed => "Payment failed",
      JobStatus::ProcessingPayment => "Processing payment",
      JobStatus::Paid => "Paid",
      JobStatus::Completed => "Completed",
      JobStatus::Unknown(_) => "unknown",
    }
  }
}

impl From<String> for JobStatus {
  fn from(raw: String) -> Self {
    match raw.as_str() {
      "pendingApproval" => JobStatus::PendingApproval,
      "inProgress" => JobStatus::InProgress,
      "rejected" => JobStatus::Rejected,
      "inEscrow" => JobStatus::InEscrow,
      "paymentFailed" => JobStatus::PaymentFailed,
      "processingPayment" => JobStatus::ProcessingPayment,
      "paid" => JobStatus::Paid,
      "completed" => JobStatus::Completed,
      _ => JobStatus::Unknown(raw),
    }
  }
}

impl From<JobStatus> for String {
  fn from(status: JobStatus) -> Self {
    status.as_str().to_string()
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A job as stored remotely.
///
/// `id`, `owner_id` and `provider_id` never change after creation.
/// `scheduled_at` is optional only because remote data can be malformed;
/// the feed drops records without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
  pub id: JobId,
  pub owner_id: UserId,
  pub provider_id: UserId,
  pub status: JobStatus,
  pub scheduled_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub amount: Option<Money>,
  #[serde(default)]
  pub notes: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Partial update of the mutable job fields.
///
/// `None` leaves a field untouched; for optional fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<JobStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<Option<DateTime<Utc>>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub amount: Option<Option<Money>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<Option<String>>,
}

impl JobPatch {
  pub fn status(status: JobStatus) -> Self {
    Self {
      status: Some(status),
      ..Self::default()
    }
  }

  /// Apply to `job` and return the patch that restores exactly the fields
  /// this one touched.
  pub fn apply(&self, job: &mut JobRecord) -> JobPatch {
    let mut inverse = JobPatch::default();
    if let Some(status) = &self.status {
      inverse.status = Some(std::mem::replace(&mut job.status, status.clone()));
    }
    if let Some(scheduled_at) = &self.scheduled_at {
      inverse.scheduled_at = Some(std::mem::replace(&mut job.scheduled_at, *scheduled_at));
    }
    if let Some(amount) = &self.amount {
      inverse.amount = Some(std::mem::replace(&mut job.amount, amount.clone()));
    }
    if let Some(notes) = &self.notes {
      inverse.notes = Some(std::mem::replace(&mut job.notes, notes.clone()));
    }
    inverse
  }
}

/// Which side of a booking the current user is acting as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Requester,
  Fulfiller,
}

impl Role {
  /// Namespace holding the display record of the other party
  pub fn counterpart_namespace(self) -> Namespace {
    match self {
      Role::Requester => Namespace::Fulfiller,
      Role::Fulfiller => Namespace::Requester,
    }
  }

  /// Reference key of the other party on `job`
  pub fn counterpart_key(self, job: &JobRecord) -> ReferenceKey {
    let id = match self {
      Role::Requester => job.provider_id.clone(),
      Role::Fulfiller => job.owner_id.clone(),
    };
    ReferenceKey::new(self.counterpart_namespace(), id)
  }
}

impl FromStr for Role {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "requester" | "client" => Ok(Role::Requester),
      "fulfiller" | "provider" => Ok(Role::Fulfiller),
      other => Err(format!("unknown role '{}'", other)),
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Role::Requester => f.write_str("requester"),
      Role::Fulfiller => f.write_str("fulfiller"),
    }
  }
}

/// Reference namespace; ids are only unique within one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Namespace {
  /// Requesting parties (clients)
  Requester,
  /// Fulfilling parties (providers)
  Fulfiller,
}

impl Namespace {
  pub fn as_str(self) -> &'static str {
    match self {
      Namespace::Requester => "requesting-party",
      Namespace::Fulfiller => "fulfilling-party",
    }
  }
}

/// Fully qualified reference lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceKey {
  pub namespace: Namespace,
  pub id: UserId,
}

impl ReferenceKey {
  pub fn new(namespace: Namespace, id: UserId) -> Self {
    Self { namespace, id }
  }
}

impl fmt::Display for ReferenceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.namespace.as_str(), self.id)
  }
}

/// Denormalized display data of a party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRecord {
  pub display_name: String,
  #[serde(default)]
  pub avatar_ref: Option<String>,
}

impl ReferenceRecord {
  pub fn named(display_name: impl Into<String>) -> Self {
    Self {
      display_name: display_name.into(),
      avatar_ref: None,
    }
  }
}

/// How the counterpart display data of a [`FeedEntry`] was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
  Resolved,
  /// Counterpart record doesn't exist; placeholder shown
  NotFound,
  /// Lookup failed; placeholder shown
  Failed,
}

/// A job together with the display data of its counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
  pub job: JobRecord,
  pub counterpart: ReferenceKey,
  pub display: ReferenceRecord,
  pub hydration: Hydration,
}

impl FeedEntry {
  pub fn id(&self) -> &JobId {
    &self.job.id
  }

  pub fn display_name(&self) -> &str {
    &self.display.display_name
  }
}
