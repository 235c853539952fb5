//! Upsert/merge engine.
//!
//! For each observation: look the endpoint up, then either create its record
//! or merge the observed port into it. The engine holds no state between
//! calls; every decision is re-derived from a fresh lookup.
//!
//! Writes are conditional. A create fails if another writer got there first,
//! and a merge is checked against the version returned by the lookup. Losing
//! either race sends the engine back to the lookup, so concurrent writers
//! against the same index can neither duplicate a record nor drop a port.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
  domain::endpoint::{EndpointPatch, EndpointRecord, Observation, PortSet},
  store::{IndexStore, StoreError},
};

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
  /// First observation of this endpoint; a new record was written
  Created,
  /// New port merged into an existing record
  Merged,
  /// Port already recorded; nothing written
  Noop,
}

impl UpsertOutcome {
  pub fn as_str(&self) -> &'static str {
    match self {
      UpsertOutcome::Created => "created",
      UpsertOutcome::Merged => "merged",
      UpsertOutcome::Noop => "noop",
    }
  }
}

impl std::fmt::Display for UpsertOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum UpsertError {
  #[error("Observation has no endpoint key")]
  MissingKey,
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error("Gave up on {key} after losing {attempts} write races")]
  Contended { key: String, attempts: u32 },
}

/// Write issued by an earlier attempt of the same upsert
enum PendingWrite {
  Create(EndpointRecord),
  Merge(PortSet),
}

pub struct UpsertEngine {
  store: Arc<dyn IndexStore>,
  index: String,
  conflict_retries: u32,
}

impl UpsertEngine {
  pub fn new(store: Arc<dyn IndexStore>, index: impl Into<String>, conflict_retries: u32) -> Self {
    Self {
      store,
      index: index.into(),
      conflict_retries,
    }
  }

  pub fn index(&self) -> &str {
    &self.index
  }

  /// Create the endpoint's record, or merge the observed port into it.
  #[tracing::instrument(level = "trace", skip(self, obs), fields(key = %obs.endpoint_key, port = obs.port))]
  pub async fn upsert(&self, obs: &Observation) -> Result<UpsertOutcome, UpsertError> {
    if obs.endpoint_key.is_empty() {
      return Err(UpsertError::MissingKey);
    }

    let key = obs.endpoint_key.as_str();
    let mut lost_races = 0;
    let mut pending = None;

    loop {
      match self.try_upsert(key, obs, &mut pending).await {
        Ok(outcome) => {
          trace!(outcome = %outcome, lost_races, "Upsert complete");
          return Ok(outcome);
        }
        Err(e) if e.is_conflict() && lost_races < self.conflict_retries => {
          lost_races += 1;
          debug!(key, lost_races, "Lost write race, re-reading endpoint");
        }
        Err(e) if e.is_conflict() => {
          warn!(key, lost_races, "Endpoint kept changing underneath us");
          return Err(UpsertError::Contended {
            key: key.to_string(),
            attempts: lost_races + 1,
          });
        }
        Err(e) => return Err(e.into()),
      }
    }
  }

  /// One lookup followed by at most one conditional write.
  ///
  /// `pending` remembers the write issued by the previous attempt. A write
  /// whose response was lost can still have landed; a retry of it then
  /// conflicts, and the re-read finds our own write rather than a competitor's.
  async fn try_upsert(
    &self,
    key: &str,
    obs: &Observation,
    pending: &mut Option<PendingWrite>,
  ) -> Result<UpsertOutcome, StoreError> {
    let Some(existing) = self.store.lookup(&self.index, key).await? else {
      let record = EndpointRecord::first_seen(obs);
      *pending = Some(PendingWrite::Create(record.clone()));
      self.store.create(&self.index, key, &record).await?;
      return Ok(UpsertOutcome::Created);
    };

    if existing.record.ports.contains(obs.port) {
      return Ok(match pending.take() {
        Some(PendingWrite::Create(record)) if record == existing.record => UpsertOutcome::Created,
        Some(PendingWrite::Merge(ports)) if ports == existing.record.ports => UpsertOutcome::Merged,
        _ => UpsertOutcome::Noop,
      });
    }

    let ports = existing.record.ports.with(obs.port);
    *pending = Some(PendingWrite::Merge(ports.clone()));
    self
      .store
      .update(&self.index, key, &EndpointPatch { ports }, existing.version)
      .await?;
    Ok(UpsertOutcome::Merged)
  }
}
