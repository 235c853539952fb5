//! Session driver.
//!
//! Owns one monitoring run:
//!
//! ```text
//! Starting ──► Polling ──► Sleeping ──┐
//!                 ▲                   │
//!                 └───────────────────┘
//! ```
//!
//! Starting creates the session index. Polling pulls one snapshot from the
//! discovery feed and pushes every event, in order, through the normalizer
//! and the upsert engine. Sleeping waits out the poll interval. The loop only
//! ends when the cancellation token fires.
//!
//! Error policy: a failed event is logged and skipped, and a failed feed pass
//! is retried after the next sleep. A pass that outlives its deadline is
//! cut short the same way. Only index creation is fatal.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::NaiveDateTime;
use futures::StreamExt;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
  config::Config,
  discovery::{DiscoveryFeed, DiscoveryQuery},
  normalize::normalize,
  store::{IndexSettings, IndexStore, StoreError},
  upsert::{UpsertEngine, UpsertOutcome},
};

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("Failed to create session index {index}: {source}")]
  CreateIndex {
    index: String,
    #[source]
    source: StoreError,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Starting,
  Polling,
  Sleeping,
}

/// Running totals for a session, owned by [`SessionDriver::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
  /// Endpoints stored for the first time
  pub created: u64,
  /// New ports merged into known endpoints
  pub merged: u64,
  /// Events that added nothing new
  pub unchanged: u64,
  /// Events whose upsert failed and were skipped
  pub failed: u64,
  /// Discovery lines that couldn't be parsed
  pub malformed: u64,
  /// Completed polling passes
  pub passes: u64,
}

impl SessionStats {
  fn record(&mut self, outcome: UpsertOutcome) {
    match outcome {
      UpsertOutcome::Created => self.created += 1,
      UpsertOutcome::Merged => self.merged += 1,
      UpsertOutcome::Noop => self.unchanged += 1,
    }
  }
}

/// What happened during one polling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
  pub events: u64,
  pub created: u64,
  pub merged: u64,
  pub failed: u64,
  pub malformed: u64,
  /// Set when the feed failed to start, broke off mid-pass, or ran past the pass deadline
  pub feed_error: Option<String>,
}

/// Receives progress updates from the driver
pub trait Reporter: Send {
  /// Called after every event, whatever its outcome, including malformed lines
  fn event_processed(&mut self, stats: &SessionStats);

  fn pass_finished(&mut self, _summary: &PassSummary, _stats: &SessionStats) {}
}

/// Reporter that only writes to the log
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
  fn event_processed(&mut self, stats: &SessionStats) {
    debug!(stored = stats.created, "Number of entries stored");
  }

  fn pass_finished(&mut self, summary: &PassSummary, stats: &SessionStats) {
    info!(
      pass = stats.passes,
      events = summary.events,
      created = summary.created,
      merged = summary.merged,
      failed = summary.failed,
      stored = stats.created,
      "Polling pass finished"
    );
  }
}

/// Index name for a session started at `started`, e.g. `2024-05-01-13-37-00_uncover_results`
pub fn session_index_name(started: NaiveDateTime, suffix: &str) -> String {
  format!("{}{}", started.format("%Y-%m-%d-%H-%M-%S"), suffix)
}

/// Everything the driver needs besides its collaborators
#[derive(Debug, Clone)]
pub struct SessionOptions {
  pub index: String,
  pub settings: IndexSettings,
  pub poll_interval: Duration,
  pub conflict_retries: u32,
  /// Deadline for one polling pass, `None` for no limit
  pub pass_timeout: Option<Duration>,
}

impl SessionOptions {
  pub fn from_config(config: &Config, started: NaiveDateTime) -> Self {
    Self {
      index: session_index_name(started, &config.store.index_suffix),
      settings: IndexSettings::from(&config.store),
      poll_interval: Duration::from_secs(config.session.poll_interval_secs),
      conflict_retries: config.session.conflict_retries,
      pass_timeout: config.session.pass_timeout(),
    }
  }

  /// Options for a session starting now, local time
  pub fn starting_now(config: &Config) -> Self {
    Self::from_config(config, chrono::Local::now().naive_local())
  }
}

pub struct SessionDriver {
  feed: Arc<dyn DiscoveryFeed>,
  engine: UpsertEngine,
  query: DiscoveryQuery,
  poll_interval: Duration,
  pass_timeout: Option<Duration>,
  state: SessionState,
}

impl SessionDriver {
  /// Create the session index and return a driver ready to poll.
  pub async fn start(
    store: Arc<dyn IndexStore>,
    feed: Arc<dyn DiscoveryFeed>,
    query: DiscoveryQuery,
    options: SessionOptions,
  ) -> Result<Self, SessionError> {
    info!(index = %options.index, "Creating new index");

    store
      .create_index(&options.index, options.settings)
      .await
      .map_err(|source| SessionError::CreateIndex {
        index: options.index.clone(),
        source,
      })?;

    info!(
      queries = ?query.queries,
      providers = ?query.providers,
      feed = feed.name(),
      "Monitoring query"
    );

    Ok(Self {
      feed,
      engine: UpsertEngine::new(store, options.index, options.conflict_retries),
      query,
      poll_interval: options.poll_interval,
      pass_timeout: options.pass_timeout,
      state: SessionState::Starting,
    })
  }

  pub fn index(&self) -> &str {
    self.engine.index()
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  fn transition(&mut self, next: SessionState) {
    debug!(from = ?self.state, to = ?next, "Session state change");
    self.state = next;
  }

  /// Poll and sleep until cancelled. Returns the final totals.
  pub async fn run(&mut self, cancel: &CancellationToken, reporter: &mut dyn Reporter) -> SessionStats {
    let mut stats = SessionStats::default();

    loop {
      self.transition(SessionState::Polling);

      let summary = tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        summary = self.poll_once(&mut stats, reporter) => summary,
      };

      stats.passes += 1;
      reporter.pass_finished(&summary, &stats);

      self.transition(SessionState::Sleeping);

      tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        _ = tokio::time::sleep(self.poll_interval) => {}
      }
    }

    info!(
      index = %self.index(),
      stored = stats.created,
      merged = stats.merged,
      failed = stats.failed,
      passes = stats.passes,
      "Session stopped"
    );
    stats
  }

  /// Run a single polling pass.
  ///
  /// Never fails: per-event errors are counted and skipped, feed errors end
  /// the pass and are reported in the summary. Waiting on the feed stops at
  /// the pass deadline; dropping the stream stops the discovery tool.
  pub async fn poll_once(&self, stats: &mut SessionStats, reporter: &mut dyn Reporter) -> PassSummary {
    let mut summary = PassSummary::default();
    let deadline = self.pass_timeout.map(|limit| Instant::now() + limit);

    let mut events = match within(deadline, self.feed.fetch(&self.query)).await {
      Some(Ok(events)) => events,
      Some(Err(e)) => {
        error!(feed = self.feed.name(), err = %e, "Discovery pass failed, retrying after sleep");
        summary.feed_error = Some(e.to_string());
        return summary;
      }
      None => {
        self.pass_timed_out(&mut summary);
        return summary;
      }
    };

    loop {
      let item = match within(deadline, events.next()).await {
        Some(Some(item)) => item,
        Some(None) => break,
        None => {
          self.pass_timed_out(&mut summary);
          break;
        }
      };

      let raw = match item {
        Ok(raw) => raw,
        Err(e) if e.ends_pass() => {
          error!(feed = self.feed.name(), err = %e, "Discovery pass aborted, retrying after sleep");
          summary.feed_error = Some(e.to_string());
          break;
        }
        Err(e) => {
          warn!(err = %e, "Skipping malformed discovery event");
          stats.malformed += 1;
          summary.malformed += 1;
          reporter.event_processed(stats);
          continue;
        }
      };

      summary.events += 1;
      let obs = normalize(&raw);

      match self.engine.upsert(&obs).await {
        Ok(outcome) => {
          stats.record(outcome);
          match outcome {
            UpsertOutcome::Created => {
              summary.created += 1;
              info!(
                key = %obs.endpoint_key,
                port = obs.port,
                source = %obs.source,
                host = %obs.host,
                outcome = %outcome,
                "Stored new endpoint"
              );
            }
            UpsertOutcome::Merged => {
              summary.merged += 1;
              debug!(key = %obs.endpoint_key, port = obs.port, outcome = %outcome, "Merged new port");
            }
            UpsertOutcome::Noop => {}
          }
        }
        Err(e) => {
          stats.failed += 1;
          summary.failed += 1;
          error!(
            key = %obs.endpoint_key,
            port = obs.port,
            source = %obs.source,
            err = %e,
            "Failed to store discovery event, skipping"
          );
        }
      }

      reporter.event_processed(stats);
    }

    summary
  }

  fn pass_timed_out(&self, summary: &mut PassSummary) {
    let limit = self.pass_timeout.unwrap_or_default().as_secs();
    error!(
      feed = self.feed.name(),
      limit_secs = limit,
      events = summary.events,
      "Discovery pass timed out, retrying after sleep"
    );
    summary.feed_error = Some(format!("discovery pass exceeded {}s", limit));
  }
}

/// Await `fut` until `deadline`. `None` means the deadline passed first.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
  match deadline {
    Some(deadline) => timeout_at(deadline, fut).await.ok(),
    None => Some(fut.await),
  }
}
