//! Discovery feed: the producer side of the monitor.
//!
//! A feed turns a query into a finite stream of raw events for one polling
//! pass. Each pass is a fresh snapshot; the session driver re-fetches after
//! sleeping.

mod uncover;

use futures::stream::BoxStream;
use thiserror::Error;

pub use uncover::UncoverFeed;

/// Providers enabled by the `all` shorthand
pub const ALL_PROVIDERS: &[&str] = &[
  "shodan",
  "shodan-idb",
  "fofa",
  "censys",
  "quake",
  "hunter",
  "zoomeye",
  "netlas",
  "criminalip",
  "publicwww",
  "hunterhow",
];

pub const DEFAULT_PROVIDER: &str = "shodan";

/// One untyped event as emitted by the provider
pub type RawEvent = serde_json::Value;

/// Stream of events for a single pass
pub type EventStream = BoxStream<'static, Result<RawEvent, DiscoveryError>>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
  #[error("Failed to start discovery tool '{binary}': {source}")]
  Spawn {
    binary: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed reading discovery output: {0}")]
  Io(#[from] std::io::Error),
  #[error("Discovery tool exited with {status}: {stderr}")]
  Exited { status: String, stderr: String },
  #[error("Malformed discovery event: {0}")]
  Malformed(String),
}

impl DiscoveryError {
  /// Whether the error ends the current polling pass.
  ///
  /// A malformed line only costs that one event.
  pub fn ends_pass(&self) -> bool {
    !matches!(self, DiscoveryError::Malformed(_))
  }
}

/// What to search for and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryQuery {
  pub queries: Vec<String>,
  pub providers: Vec<String>,
}

impl DiscoveryQuery {
  /// Build a query from comma-separated query and provider lists.
  ///
  /// An empty provider selector means [`DEFAULT_PROVIDER`]; `all` expands to
  /// [`ALL_PROVIDERS`].
  pub fn parse(queries: &str, providers: &str) -> Self {
    let queries = split_list(queries);

    let providers = if providers.trim().eq_ignore_ascii_case("all") {
      ALL_PROVIDERS.iter().map(|s| s.to_string()).collect()
    } else {
      let list = split_list(providers);
      if list.is_empty() {
        vec![DEFAULT_PROVIDER.to_string()]
      } else {
        list
      }
    };

    Self { queries, providers }
  }
}

fn split_list(s: &str) -> Vec<String> {
  s.split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

/// A source of discovery events
#[async_trait::async_trait]
pub trait DiscoveryFeed: Send + Sync {
  fn name(&self) -> &str;

  /// Start one polling pass
  async fn fetch(&self, query: &DiscoveryQuery) -> Result<EventStream, DiscoveryError>;
}
