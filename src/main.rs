use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use jobfeed::types::{
  JobId, JobRecord, JobStatus, Money, Namespace, ReferenceKey, ReferenceRecord, Role, UserId,
};
use jobfeed::{logging, Config, MemoryStore, Session, StaticIdentity, StatusFilter};

const COUNTERPARTS: [&str; 4] = ["Ana Lima", "Bruno Costa", "Chen Wei", "Dana Olsen"];

#[derive(Parser, Debug)]
#[command(name = "jobfeed")]
#[command(about = "Browse a live job feed backed by an in-memory store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/jobfeed/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// User to log in as
  #[arg(short, long, default_value = "demo-user")]
  user: String,

  /// View to open: requester or fulfiller
  #[arg(short, long, default_value = "fulfiller")]
  role: Role,

  /// Number of demo jobs to seed
  #[arg(long, default_value_t = 30)]
  seed: usize,

  /// Free-text search over counterpart names and notes
  #[arg(short, long)]
  search: Option<String>,

  /// Only show jobs in this status (e.g. pendingApproval), or "all"
  #[arg(long, default_value = "all")]
  status: StatusFilter,

  /// Keep loading pages until the feed is exhausted
  #[arg(long)]
  load_all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let user = UserId::new(args.user);
  let store = MemoryStore::new();
  seed_store(&store, &user, args.seed);

  let identity = StaticIdentity {
    user_id: user,
    role: args.role,
  };
  let mut session = Session::login(Arc::new(store), &identity, &config);
  let feed = session.feed_mut();
  feed.settle().await;

  if args.load_all {
    while feed.load_more() {
      feed.settle().await;
    }
  }

  feed.set_status_filter(args.status);
  if let Some(text) = &args.search {
    feed.set_search_query(text);
    feed.settle().await;
  }

  if let Some(spec) = feed.query_spec() {
    println!("{}", spec.describe());
  }
  for entry in feed.visible_entities() {
    let when = entry
      .job
      .scheduled_at
      .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
      .unwrap_or_default();
    let amount = entry
      .job
      .amount
      .as_ref()
      .map(|m| format!("{}.{:02} {}", m.minor / 100, (m.minor % 100).abs(), m.currency))
      .unwrap_or_default();
    println!(
      "{:<10} {:<16} {:<18} {:<20} {:>12}  {}",
      entry.id(),
      when,
      entry.job.status.label(),
      entry.display_name(),
      amount,
      entry.job.notes.as_deref().unwrap_or("")
    );
  }
  println!(
    "{} shown, {} loaded{}",
    feed.visible_entities().len(),
    feed.entries().len(),
    if feed.has_more() { ", more available" } else { "" }
  );

  if let Some(error) = feed.last_error() {
    warn!(%error, "feed reported an error");
    eprintln!("error: {}", error);
  }

  session.logout();
  Ok(())
}

/// Fill the store with jobs where `user` is on either side
fn seed_store(store: &MemoryStore, user: &UserId, count: usize) {
  const STATUSES: [JobStatus; 5] = [
    JobStatus::PendingApproval,
    JobStatus::InEscrow,
    JobStatus::ProcessingPayment,
    JobStatus::Paid,
    JobStatus::InProgress,
  ];

  for (i, name) in COUNTERPARTS.iter().enumerate() {
    let id = UserId::new(format!("party-{}", i));
    store.put_reference(
      ReferenceKey::new(Namespace::Requester, id.clone()),
      ReferenceRecord::named(*name),
    );
    store.put_reference(
      ReferenceKey::new(Namespace::Fulfiller, id),
      ReferenceRecord::named(*name),
    );
  }

  let now = Utc::now();
  store.seed_jobs((0..count).map(|i| {
    // One counterpart id is left unregistered to show the placeholder
    let other = UserId::new(format!("party-{}", i % (COUNTERPARTS.len() + 1)));
    let (owner_id, provider_id) = if i % 3 == 0 {
      (user.clone(), other)
    } else {
      (other, user.clone())
    };
    JobRecord {
      id: JobId::new(format!("job-{:03}", i)),
      owner_id,
      provider_id,
      status: STATUSES[i % STATUSES.len()].clone(),
      scheduled_at: Some(now + ChronoDuration::hours(i as i64 * 6)),
      amount: Some(Money {
        minor: 2_500 + i as i64 * 150,
        currency: "EUR".to_string(),
      }),
      notes: (i % 4 == 0).then(|| format!("Visit #{} at the side entrance", i + 1)),
      created_at: now - ChronoDuration::days(1),
    }
  }));
}
