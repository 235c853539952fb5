use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use super::{DocVersion, IndexSettings, IndexStore, StoreError, StoredEndpoint};
use crate::{
  config::StoreConfig,
  domain::endpoint::{EndpointPatch, EndpointRecord},
};

/// Longest slice of a raw error body kept as the reason
const MAX_REASON_LEN: usize = 300;

/// Elasticsearch-compatible HTTP store
#[derive(Clone)]
pub struct ElasticStore {
  client: reqwest::Client,
  base_url: Url,
  username: Option<String>,
  password: Option<String>,
}

impl ElasticStore {
  pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
    let base_url = Url::parse(&config.base_url())
      .map_err(|e| StoreError::Malformed(format!("invalid store address '{}': {}", config.base_url(), e)))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .danger_accept_invalid_certs(config.accept_invalid_certs)
      .build()?;

    if config.accept_invalid_certs {
      warn!(base_url = %base_url, "TLS certificate verification disabled for index store");
    }

    info!(
      base_url = %base_url,
      username = %config.username,
      timeout_secs = config.timeout_secs,
      "Index store client initialized"
    );

    Ok(Self {
      client,
      base_url,
      username: (!config.username.is_empty()).then(|| config.username.clone()),
      password: (!config.password.is_empty()).then(|| config.password.clone()),
    })
  }

  /// Append path segments to the base URL. Segments are percent-encoded.
  fn url(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  /// `_create` endpoint, which refuses to overwrite an existing id
  fn create_url(&self, index: &str, key: &str) -> Url {
    let mut url = self.url(&[index, "_create", key]);
    url.query_pairs_mut().append_pair("refresh", "true");
    url
  }

  /// `_update` endpoint, conditional on `expected` when given
  fn update_url(&self, index: &str, key: &str, expected: Option<DocVersion>) -> Url {
    let mut url = self.url(&[index, "_update", key]);
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("refresh", "true");
      if let Some(version) = expected {
        query
          .append_pair("if_seq_no", &version.seq_no.to_string())
          .append_pair("if_primary_term", &version.primary_term.to_string());
      }
    }
    url
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.username {
      Some(username) => builder.basic_auth(username, self.password.as_ref()),
      None => builder,
    }
  }

  /// Send a request and return the body, turning error statuses into [`StoreError::Application`].
  async fn send(&self, op: &'static str, builder: RequestBuilder) -> Result<String, StoreError> {
    let start = Instant::now();
    let response = builder.send().await?;
    let status = response.status();
    let body = response.text().await?;

    trace!(
      op,
      status = %status,
      elapsed_ms = start.elapsed().as_millis(),
      "Received store response"
    );

    if !status.is_success() {
      let reason = error_reason(&body);
      debug!(op, status = %status, reason = %reason, "Store request rejected");
      return Err(StoreError::Application {
        status: status.as_u16(),
        reason,
      });
    }

    Ok(body)
  }
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
  doc: &'a EndpointPatch,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
  hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
  total: Option<TotalHits>,
  #[serde(default)]
  hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct TotalHits {
  value: u64,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
  #[serde(rename = "_source")]
  source: EndpointRecord,
  #[serde(rename = "_seq_no")]
  seq_no: Option<u64>,
  #[serde(rename = "_primary_term")]
  primary_term: Option<u64>,
}

#[async_trait]
impl IndexStore for ElasticStore {
  async fn create_index(&self, index: &str, settings: IndexSettings) -> Result<(), StoreError> {
    let body = json!({
      "settings": {
        "number_of_shards": settings.shards,
        "number_of_replicas": settings.replicas,
      }
    });

    let builder = self.request(Method::PUT, self.url(&[index])).json(&body);
    self.send("create_index", builder).await?;

    info!(index, shards = settings.shards, replicas = settings.replicas, "Created index");
    Ok(())
  }

  async fn lookup(&self, index: &str, key: &str) -> Result<Option<StoredEndpoint>, StoreError> {
    let body = json!({
      "query": { "term": { "_id": key } },
      "size": 1,
      "seq_no_primary_term": true,
    });

    let builder = self.request(Method::POST, self.url(&[index, "_search"])).json(&body);
    let response = self.send("lookup", builder).await?;
    parse_lookup(&response)
  }

  async fn create(&self, index: &str, key: &str, record: &EndpointRecord) -> Result<(), StoreError> {
    let builder = self.request(Method::PUT, self.create_url(index, key)).json(record);
    self.send("create", builder).await?;
    Ok(())
  }

  async fn update(
    &self,
    index: &str,
    key: &str,
    patch: &EndpointPatch,
    expected: Option<DocVersion>,
  ) -> Result<(), StoreError> {
    let url = self.update_url(index, key, expected);
    let builder = self.request(Method::POST, url).json(&UpdateRequest { doc: patch });
    self.send("update", builder).await?;
    Ok(())
  }
}

/// Decode a `_search` response into at most one stored endpoint.
fn parse_lookup(body: &str) -> Result<Option<StoredEndpoint>, StoreError> {
  let response: SearchResponse =
    serde_json::from_str(body).map_err(|e| StoreError::Malformed(format!("search response: {}", e)))?;

  if response.hits.total.as_ref().is_some_and(|t| t.value == 0) {
    return Ok(None);
  }

  Ok(response.hits.hits.into_iter().next().map(|hit| {
    let version = match (hit.seq_no, hit.primary_term) {
      (Some(seq_no), Some(primary_term)) => Some(DocVersion { seq_no, primary_term }),
      _ => None,
    };
    StoredEndpoint {
      record: hit.source,
      version,
    }
  }))
}

/// Pull a human-readable reason out of an error body.
///
/// Prefers `error.root_cause[0].reason`, then `error.reason`, then a plain
/// string `error`, then the raw body.
fn error_reason(body: &str) -> String {
  let parsed = serde_json::from_str::<Value>(body).ok();
  let reason = parsed.as_ref().and_then(|value| {
    let error = &value["error"];
    error["root_cause"][0]["reason"]
      .as_str()
      .or_else(|| error["reason"].as_str())
      .or_else(|| error.as_str())
      .map(str::to_string)
  });

  reason.unwrap_or_else(|| {
    let trimmed = body.trim();
    if trimmed.is_empty() {
      "empty response body".to_string()
    } else {
      trimmed.chars().take(MAX_REASON_LEN).collect()
    }
  })
}
