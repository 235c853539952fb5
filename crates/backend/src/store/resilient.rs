//! Retries for transient store failures.
//!
//! Transport errors and 429/502/503/504 are retried after a capped,
//! exponentially growing delay. Conflicts and every other application error
//! are returned untouched.
//!
//! A write can land even when its response is lost, so a retried create or
//! update may answer 409. The upsert engine recognizes its own earlier write
//! when it re-reads the document.

use std::{
  collections::hash_map::RandomState,
  future::Future,
  hash::{BuildHasher, Hasher},
  time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use super::{DocVersion, IndexSettings, IndexStore, StoreError, StoredEndpoint};
use crate::domain::endpoint::{EndpointPatch, EndpointRecord};

#[derive(Debug, Clone)]
pub struct RetryConfig {
  /// Attempts after the first one
  pub max_retries: u32,
  /// Delay before the first retry, doubled for each later one
  pub base_delay: Duration,
  /// Cap on any single delay, jitter included
  pub max_delay: Duration,
  /// Random extra delay as a fraction of the computed one, 0 disables
  pub jitter: f64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_millis(250),
      max_delay: Duration::from_secs(5),
      jitter: 0.2,
    }
  }
}

impl RetryConfig {
  /// Delay before retry number `retry`, counting from 1
  pub fn delay_for(&self, retry: u32) -> Duration {
    let doublings = retry.saturating_sub(1).min(16);
    let delay = self.base_delay.saturating_mul(1 << doublings).min(self.max_delay);

    if self.jitter <= 0.0 {
      return delay;
    }
    delay
      .mul_f64(1.0 + self.jitter.min(1.0) * unit_sample())
      .min(self.max_delay)
  }
}

/// Uniform sample in `[0, 1)`, seeded from the per-process random hasher keys
fn unit_sample() -> f64 {
  let bits = RandomState::new().build_hasher().finish() >> 11;
  bits as f64 / (1u64 << 53) as f64
}

/// Wraps another store and retries transient failures
pub struct ResilientStore<S: IndexStore> {
  inner: S,
  config: RetryConfig,
}

impl<S: IndexStore> ResilientStore<S> {
  pub fn new(store: S) -> Self {
    Self {
      inner: store,
      config: RetryConfig::default(),
    }
  }

  pub fn with_config(store: S, config: RetryConfig) -> Self {
    Self { inner: store, config }
  }

  async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StoreError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    let max_retries = self.config.max_retries;
    let mut attempt = 0;

    loop {
      if attempt > 0 {
        let delay = self.config.delay_for(attempt);
        trace!(op, delay_ms = delay.as_millis(), "Waiting before retry");
        sleep(delay).await;
      }

      match call().await {
        Ok(value) => {
          if attempt > 0 {
            info!(op, attempt, "Store request succeeded after retry");
          }
          return Ok(value);
        }
        Err(e) if e.is_retryable() && attempt < max_retries => {
          warn!(
            op,
            attempt = attempt + 1,
            max_retries,
            err = %e,
            "Retryable store error, will retry"
          );
          attempt += 1;
        }
        Err(e) => {
          if e.is_retryable() {
            warn!(op, max_retries, err = %e, "All retries exhausted");
          } else {
            debug!(op, err = %e, "Store error is not retryable");
          }
          return Err(e);
        }
      }
    }
  }
}

#[async_trait]
impl<S: IndexStore> IndexStore for ResilientStore<S> {
  async fn create_index(&self, index: &str, settings: IndexSettings) -> Result<(), StoreError> {
    self
      .with_retry("create_index", || self.inner.create_index(index, settings))
      .await
  }

  async fn lookup(&self, index: &str, key: &str) -> Result<Option<StoredEndpoint>, StoreError> {
    self.with_retry("lookup", || self.inner.lookup(index, key)).await
  }

  async fn create(&self, index: &str, key: &str, record: &EndpointRecord) -> Result<(), StoreError> {
    self.with_retry("create", || self.inner.create(index, key, record)).await
  }

  async fn update(
    &self,
    index: &str,
    key: &str,
    patch: &EndpointPatch,
    expected: Option<DocVersion>,
  ) -> Result<(), StoreError> {
    self
      .with_retry("update", || self.inner.update(index, key, patch, expected))
      .await
  }
}
