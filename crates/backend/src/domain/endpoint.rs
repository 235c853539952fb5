use serde::{Deserialize, Serialize};

/// Sorted, duplicate-free set of ports.
///
/// Serialized as a plain JSON array. Deserialization sorts and dedups, so a
/// document written by another tool still satisfies the invariant once read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u16>", into = "Vec<u16>")]
pub struct PortSet(Vec<u16>);

impl PortSet {
  pub fn new() -> Self {
    Self(Vec::new())
  }

  pub fn single(port: u16) -> Self {
    Self(vec![port])
  }

  pub fn contains(&self, port: u16) -> bool {
    self.0.binary_search(&port).is_ok()
  }

  /// Insert a port, keeping the set sorted. Returns false if it was already present.
  pub fn insert(&mut self, port: u16) -> bool {
    match self.0.binary_search(&port) {
      Ok(_) => false,
      Err(pos) => {
        self.0.insert(pos, port);
        true
      }
    }
  }

  /// Copy of this set with `port` added
  pub fn with(&self, port: u16) -> Self {
    let mut ports = self.clone();
    ports.insert(port);
    ports
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_slice(&self) -> &[u16] {
    &self.0
  }
}

impl From<Vec<u16>> for PortSet {
  fn from(mut ports: Vec<u16>) -> Self {
    ports.sort_unstable();
    ports.dedup();
    Self(ports)
  }
}

impl From<PortSet> for Vec<u16> {
  fn from(ports: PortSet) -> Self {
    ports.0
  }
}

impl FromIterator<u16> for PortSet {
  fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
    iter.into_iter().collect::<Vec<_>>().into()
  }
}

/// One persisted document per endpoint key.
///
/// Only `ports` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
  /// Seconds since epoch of the first observation
  #[serde(default)]
  pub timestamp: f64,
  /// Provider that first reported the endpoint
  #[serde(default)]
  pub source: String,
  #[serde(default)]
  pub ports: PortSet,
  #[serde(default)]
  pub host: String,
  #[serde(default)]
  pub url: String,
}

impl EndpointRecord {
  /// Build the initial record for an endpoint seen for the first time
  pub fn first_seen(obs: &Observation) -> Self {
    Self {
      timestamp: obs.timestamp,
      source: obs.source.clone(),
      ports: PortSet::single(obs.port),
      host: obs.host.clone(),
      url: obs.url.clone(),
    }
  }
}

/// Partial update sent when merging a new port.
///
/// Carries the whole port set; immutable fields are never part of a patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointPatch {
  pub ports: PortSet,
}

/// Canonical form of one discovery event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
  /// Endpoint identity, the IP address
  pub endpoint_key: String,
  pub port: u16,
  pub timestamp: f64,
  pub source: String,
  pub host: String,
  pub url: String,
}
