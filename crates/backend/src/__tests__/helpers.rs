//! Shared test doubles for engine and session tests.
//!
//! `MemoryStore` mimics the index store's conditional-write semantics
//! (conflict on duplicate create, conflict on stale version) and can inject
//! failures and competing writers. `ScriptedFeed` replays canned passes.

use std::{
  collections::{HashMap, HashSet, VecDeque},
  sync::{
    Arc, Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
  discovery::{DiscoveryError, DiscoveryFeed, DiscoveryQuery, EventStream, RawEvent},
  endpoint::{EndpointPatch, EndpointRecord, Observation, PortSet},
  session::{PassSummary, Reporter, SessionStats},
  store::{DocVersion, IndexSettings, IndexStore, StoreError, StoredEndpoint},
  upsert::UpsertEngine,
};

pub const INDEX: &str = "2024-05-01-13-37-00_uncover_results";

struct Doc {
  record: EndpointRecord,
  seq_no: u64,
}

/// A writer that slips in right after a lookup
struct Competitor {
  record: EndpointRecord,
  remaining: u32,
}

#[derive(Default)]
pub struct MemoryStore {
  indices: Mutex<HashMap<String, HashMap<String, Doc>>>,
  seq: AtomicU64,
  failing_keys: Mutex<HashSet<String>>,
  competitor: Mutex<Option<Competitor>>,
  lost_responses: AtomicUsize,
  pub lookups: AtomicUsize,
  pub creates: AtomicUsize,
  pub updates: AtomicUsize,
  pub conflicts: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store with [`INDEX`] already created
  pub fn with_index() -> Self {
    let store = Self::default();
    store.indices.lock().unwrap().insert(INDEX.to_string(), HashMap::new());
    store
  }

  pub fn has_index(&self, index: &str) -> bool {
    self.indices.lock().unwrap().contains_key(index)
  }

  pub fn get(&self, key: &str) -> Option<EndpointRecord> {
    let indices = self.indices.lock().unwrap();
    indices.get(INDEX)?.get(key).map(|doc| doc.record.clone())
  }

  pub fn ports(&self, key: &str) -> Vec<u16> {
    self
      .get(key)
      .map(|record| record.ports.as_slice().to_vec())
      .unwrap_or_default()
  }

  pub fn doc_count(&self) -> usize {
    self.indices.lock().unwrap().get(INDEX).map_or(0, HashMap::len)
  }

  /// Successful creates and updates
  pub fn writes(&self) -> usize {
    self.creates.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
  }

  /// Make every lookup of `key` fail with a 500
  pub fn fail_key(&self, key: &str) {
    self.failing_keys.lock().unwrap().insert(key.to_string());
  }

  /// After each of the next `times` lookups, overwrite the looked-up key with `record`.
  pub fn race_with(&self, record: EndpointRecord, times: u32) {
    *self.competitor.lock().unwrap() = Some(Competitor {
      record,
      remaining: times,
    });
  }

  /// Apply the next `count` writes, then answer each with a 503 as if the response was lost
  pub fn lose_write_responses(&self, count: usize) {
    self.lost_responses.store(count, Ordering::SeqCst);
  }

  fn lost_response(&self) -> Result<(), StoreError> {
    let lost = self
      .lost_responses
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if lost {
      return Err(app_error(503, "response lost"));
    }
    Ok(())
  }

  fn next_seq(&self) -> u64 {
    self.seq.fetch_add(1, Ordering::SeqCst)
  }

  fn run_competitor(&self, index: &str, key: &str) {
    let record = {
      let mut competitor = self.competitor.lock().unwrap();
      match competitor.as_mut() {
        Some(c) if c.remaining > 0 => {
          c.remaining -= 1;
          c.record.clone()
        }
        _ => return,
      }
    };

    let seq_no = self.next_seq();
    if let Some(docs) = self.indices.lock().unwrap().get_mut(index) {
      docs.insert(key.to_string(), Doc { record, seq_no });
    }
  }

  fn conflict(&self, reason: &str) -> StoreError {
    self.conflicts.fetch_add(1, Ordering::SeqCst);
    app_error(409, reason)
  }
}

fn app_error(status: u16, reason: &str) -> StoreError {
  StoreError::Application {
    status,
    reason: reason.to_string(),
  }
}

#[async_trait]
impl IndexStore for MemoryStore {
  async fn create_index(&self, index: &str, _settings: IndexSettings) -> Result<(), StoreError> {
    let mut indices = self.indices.lock().unwrap();
    if indices.contains_key(index) {
      return Err(app_error(400, &format!("index [{}] already exists", index)));
    }
    indices.insert(index.to_string(), HashMap::new());
    Ok(())
  }

  async fn lookup(&self, index: &str, key: &str) -> Result<Option<StoredEndpoint>, StoreError> {
    self.lookups.fetch_add(1, Ordering::SeqCst);

    if self.failing_keys.lock().unwrap().contains(key) {
      return Err(app_error(500, "injected failure"));
    }

    let found = {
      let indices = self.indices.lock().unwrap();
      let docs = indices
        .get(index)
        .ok_or_else(|| app_error(404, &format!("no such index [{}]", index)))?;
      docs.get(key).map(|doc| StoredEndpoint {
        record: doc.record.clone(),
        version: Some(DocVersion {
          seq_no: doc.seq_no,
          primary_term: 1,
        }),
      })
    };

    self.run_competitor(index, key);

    // Let concurrent upserts interleave between read and write
    tokio::task::yield_now().await;

    Ok(found)
  }

  async fn create(&self, index: &str, key: &str, record: &EndpointRecord) -> Result<(), StoreError> {
    let seq_no = self.next_seq();
    let mut indices = self.indices.lock().unwrap();
    let docs = indices
      .get_mut(index)
      .ok_or_else(|| app_error(404, &format!("no such index [{}]", index)))?;

    if docs.contains_key(key) {
      return Err(self.conflict("version conflict, document already exists"));
    }

    docs.insert(
      key.to_string(),
      Doc {
        record: record.clone(),
        seq_no,
      },
    );
    self.creates.fetch_add(1, Ordering::SeqCst);
    self.lost_response()
  }

  async fn update(
    &self,
    index: &str,
    key: &str,
    patch: &EndpointPatch,
    expected: Option<DocVersion>,
  ) -> Result<(), StoreError> {
    let seq_no = self.next_seq();
    let mut indices = self.indices.lock().unwrap();
    let doc = indices
      .get_mut(index)
      .and_then(|docs| docs.get_mut(key))
      .ok_or_else(|| app_error(404, "document missing"))?;

    if expected.is_some_and(|v| v.seq_no != doc.seq_no) {
      return Err(self.conflict("version conflict, required seqNo does not match"));
    }

    doc.record.ports = patch.ports.clone();
    doc.seq_no = seq_no;
    self.updates.fetch_add(1, Ordering::SeqCst);
    self.lost_response()
  }
}

pub type ScriptedPass = Result<Vec<Result<RawEvent, DiscoveryError>>, DiscoveryError>;

/// Feed that replays one scripted pass per fetch, then empty passes
pub struct ScriptedFeed {
  passes: Mutex<VecDeque<ScriptedPass>>,
  pub fetches: AtomicUsize,
}

impl ScriptedFeed {
  pub fn new(passes: Vec<ScriptedPass>) -> Self {
    Self {
      passes: Mutex::new(passes.into()),
      fetches: AtomicUsize::new(0),
    }
  }

  pub fn single(events: Vec<RawEvent>) -> Self {
    Self::new(vec![Ok(events.into_iter().map(Ok).collect())])
  }
}

#[async_trait]
impl DiscoveryFeed for ScriptedFeed {
  fn name(&self) -> &str {
    "scripted"
  }

  async fn fetch(&self, _query: &DiscoveryQuery) -> Result<EventStream, DiscoveryError> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    let next = self.passes.lock().unwrap().pop_front();
    match next {
      Some(Ok(events)) => Ok(stream::iter(events).boxed()),
      Some(Err(e)) => Err(e),
      None => Ok(stream::empty().boxed()),
    }
  }
}

/// Feed whose stream yields its events and then stalls without ending
pub struct HangingFeed {
  events: Vec<RawEvent>,
}

impl HangingFeed {
  pub fn new(events: Vec<RawEvent>) -> Self {
    Self { events }
  }
}

#[async_trait]
impl DiscoveryFeed for HangingFeed {
  fn name(&self) -> &str {
    "hanging"
  }

  async fn fetch(&self, _query: &DiscoveryQuery) -> Result<EventStream, DiscoveryError> {
    let events = stream::iter(self.events.clone().into_iter().map(Ok));
    Ok(events.chain(stream::pending()).boxed())
  }
}

/// Reporter that keeps everything it was told, and can stop the session
#[derive(Default)]
pub struct RecordingReporter {
  /// Stored-entries counter after each event
  pub stored: Vec<u64>,
  pub passes: Vec<PassSummary>,
  stop: Option<(CancellationToken, usize)>,
}

impl RecordingReporter {
  pub fn stop_after(cancel: CancellationToken, passes: usize) -> Self {
    Self {
      stop: Some((cancel, passes)),
      ..Default::default()
    }
  }
}

impl Reporter for RecordingReporter {
  fn event_processed(&mut self, stats: &SessionStats) {
    self.stored.push(stats.created);
  }

  fn pass_finished(&mut self, summary: &PassSummary, _stats: &SessionStats) {
    self.passes.push(summary.clone());
    if let Some((cancel, after)) = &self.stop
      && self.passes.len() >= *after
    {
      cancel.cancel();
    }
  }
}

pub fn observation(key: &str, port: u16) -> Observation {
  Observation {
    endpoint_key: key.to_string(),
    port,
    timestamp: 1_714_560_000.0,
    source: "shodan".to_string(),
    host: "a.com".to_string(),
    url: format!("http://a.com:{}", port),
  }
}

pub fn event(ip: &str, port: u16) -> RawEvent {
  json!({
    "timestamp": 1_714_560_000,
    "source": "shodan",
    "ip": ip,
    "port": port,
    "host": "a.com",
    "url": "",
  })
}

pub fn record(source: &str, ports: &[u16]) -> EndpointRecord {
  EndpointRecord {
    timestamp: 1.0,
    source: source.to_string(),
    ports: PortSet::from(ports.to_vec()),
    host: "other.com".to_string(),
    url: String::new(),
  }
}

pub fn engine(store: &Arc<MemoryStore>, conflict_retries: u32) -> UpsertEngine {
  UpsertEngine::new(store.clone(), INDEX, conflict_retries)
}
