//! Raw discovery event → [`Observation`].
//!
//! Missing or mistyped fields fall back to zero values. Nothing downstream of
//! this module sees untyped JSON.

use serde_json::Value;

use crate::{discovery::RawEvent, domain::endpoint::Observation};

pub fn normalize(event: &RawEvent) -> Observation {
  Observation {
    endpoint_key: string_field(event, "ip"),
    port: port_field(event),
    timestamp: event.get("timestamp").and_then(Value::as_f64).unwrap_or_default(),
    source: string_field(event, "source"),
    host: string_field(event, "host"),
    url: string_field(event, "url"),
  }
}

fn string_field(event: &RawEvent, key: &str) -> String {
  event
    .get(key)
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_default()
}

/// Ports arrive as integers, or as integral floats from some producers.
fn port_field(event: &RawEvent) -> u16 {
  let Some(value) = event.get("port") else {
    return 0;
  };

  if let Some(n) = value.as_u64() {
    return u16::try_from(n).unwrap_or(0);
  }

  match value.as_f64() {
    Some(f) if f.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&f) => f as u16,
    _ => 0,
  }
}
