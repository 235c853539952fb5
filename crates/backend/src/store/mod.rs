//! Index store client.
//!
//! The store owns all persisted state. [`IndexStore`] is the seam between the
//! upsert engine and the transport; [`ElasticStore`] speaks the HTTP API and
//! [`ResilientStore`] adds retries for transient failures.

mod elastic;
mod resilient;

use std::sync::Arc;

use thiserror::Error;

pub use elastic::ElasticStore;
pub use resilient::{ResilientStore, RetryConfig};

use crate::{
  config::StoreConfig,
  domain::endpoint::{EndpointPatch, EndpointRecord},
};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Store transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("Malformed store response: {0}")]
  Malformed(String),
  #[error("Store rejected request ({status}): {reason}")]
  Application { status: u16, reason: String },
}

impl StoreError {
  pub fn status(&self) -> Option<u16> {
    match self {
      StoreError::Application { status, .. } => Some(*status),
      StoreError::Transport(e) => e.status().map(|s| s.as_u16()),
      StoreError::Malformed(_) => None,
    }
  }

  /// Conditional write lost against a concurrent writer
  pub fn is_conflict(&self) -> bool {
    self.status() == Some(409)
  }

  pub fn is_not_found(&self) -> bool {
    self.status() == Some(404)
  }

  /// Transient failures worth retrying at the transport layer
  pub fn is_retryable(&self) -> bool {
    match self {
      StoreError::Transport(_) => true,
      StoreError::Application { status, .. } => matches!(status, 429 | 502 | 503 | 504),
      StoreError::Malformed(_) => false,
    }
  }
}

/// Concurrency token for version-checked writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocVersion {
  pub seq_no: u64,
  pub primary_term: u64,
}

/// A record as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEndpoint {
  pub record: EndpointRecord,
  /// None when the store didn't report one; writes are then unconditional
  pub version: Option<DocVersion>,
}

/// Settings applied when creating a session index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
  pub shards: u32,
  pub replicas: u32,
}

impl From<&StoreConfig> for IndexSettings {
  fn from(config: &StoreConfig) -> Self {
    Self {
      shards: config.shards,
      replicas: config.replicas,
    }
  }
}

#[async_trait::async_trait]
pub trait IndexStore: Send + Sync {
  /// Create an empty index. Fails if it already exists.
  async fn create_index(&self, index: &str, settings: IndexSettings) -> Result<(), StoreError>;

  /// Point lookup by endpoint key. Zero matches is `Ok(None)`.
  async fn lookup(&self, index: &str, key: &str) -> Result<Option<StoredEndpoint>, StoreError>;

  /// Insert a new record. Fails with a conflict if `key` already exists.
  ///
  /// The write must be visible to the next `lookup`.
  async fn create(&self, index: &str, key: &str, record: &EndpointRecord) -> Result<(), StoreError>;

  /// Merge `patch` into the record at `key`. Fails if `key` does not exist,
  /// or with a conflict if `expected` no longer matches.
  async fn update(
    &self,
    index: &str,
    key: &str,
    patch: &EndpointPatch,
    expected: Option<DocVersion>,
  ) -> Result<(), StoreError>;
}

impl dyn IndexStore {
  /// Build the HTTP store from config, wrapped with retries unless disabled.
  pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn IndexStore>, StoreError> {
    let store = ElasticStore::new(config)?;

    if config.max_retries == 0 {
      return Ok(Arc::new(store));
    }

    let retry = RetryConfig {
      max_retries: config.max_retries,
      ..RetryConfig::default()
    };
    Ok(Arc::new(ResilientStore::with_config(store, retry)))
  }
}
